//! Kernel: engine capability seam, deterministic resource teardown, and the world container.
//!
//! # Invariants
//! - Every engine handle is acquired through a [`ResourceScope`] and released by it, exactly once.
//! - Scopes release in reverse order of acquisition, including after a partial build.
//! - A world commits only with at least one instance and one light.
//! - The replaced light set outlives the commit of its successor.

pub mod debug;
pub mod engine;
pub mod scope;
pub mod world;

pub use debug::{DebugEngine, EngineStats};
pub use engine::{
    DataType, Engine, EngineError, Handle, ObjectKind, Param, PixelFormat, RendererContext,
    SharedBytes,
};
pub use scope::ResourceScope;
pub use world::{DEFAULT_INSTANCE_CAP, World, WorldError, WorldInstance, WorldLights};

pub fn crate_info() -> &'static str {
    "sunrise-kernel v0.1.0"
}
