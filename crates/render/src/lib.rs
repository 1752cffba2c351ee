//! Tiled rendering: tile windows with ghost margins, the per-request camera,
//! and render sessions with an async worker.
//!
//! A tile of a `rows x cols` grid covers `[col/cols, (col+1)/cols) x [row/rows, (row+1)/rows)`
//! of the normalized image plane. It is rendered `G` pixels larger on every
//! side and cropped back, so filters near tile borders see the same
//! neighbourhood as in a single full-size render.
//!
//! # Invariants
//! - Frame buffer size is always the requested size plus `2 * G` per axis; the crop restores the requested size exactly.
//! - At most one render is in flight per session.
//! - The light set for a request is committed before the frame buffer is created.
//! - An invalid tile address fails before any engine object is created.

mod camera;
mod config;
mod error;
mod session;
mod tile;
mod worker;

pub use camera::{Camera, CameraState};
pub use config::{RendererConfig, SessionConfig};
pub use error::{ConfigError, RenderError};
pub use session::{FrameInfo, RenderRequest, RenderResponse, RenderSession, SessionState};
pub use tile::{
    DEFAULT_GHOST_MARGIN, ImageWindow, TileAddress, TileAxis, TileError, TilePlan, TileRenderer,
};
pub use worker::{CancellationToken, RenderTask};

pub fn crate_info() -> &'static str {
    "sunrise-render v0.1.0"
}
