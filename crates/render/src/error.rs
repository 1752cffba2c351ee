use sunrise_kernel::{EngineError, WorldError};
use sunrise_scene::SceneError;

use crate::tile::TileError;

/// Errors from building a session or serving a render request.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The engine failed this request; the session stays usable.
    #[error("transient render failure: {0}")]
    TransientRenderFailure(#[source] EngineError),
    #[error("invalid tile: {0}")]
    InvalidTile(#[from] TileError),
    #[error("render cancelled")]
    Cancelled,
    #[error("session closed")]
    Closed,
    #[error("render worker stopped before replying")]
    WorkerGone,
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Errors from loading a session configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config extension {0:?}, expected yaml, yml or json")]
    UnsupportedFormat(String),
}
