use std::path::PathBuf;

use sunrise_assets::BufferError;
use sunrise_kernel::{EngineError, WorldError};

/// Errors from building scene content.
///
/// Loader, engine and world failures pass through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("cannot list {}: {source}", path.display())]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
