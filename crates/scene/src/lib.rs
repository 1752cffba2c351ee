//! Scene construction: geometry instances, the light rig, and city assembly.
//!
//! # Invariants
//! - An instance owns its buffers and data objects; intermediate objects are released once it is committed.
//! - A failed build releases everything it acquired before returning the error.
//! - Static lights are built once per rig; time-varying lights are rebuilt per update.
//! - `LightRig::update` is a pure function of its arguments and the rig configuration.

mod city;
mod config;
mod error;
mod geometry;
mod lights;

pub use city::{SceneAssembly, SceneSummary};
pub use config::SceneConfig;
pub use error::SceneError;
pub use geometry::{
    BACKGROUND_COLOR_FILE, BACKGROUND_INDEX_FILE, BACKGROUND_POSITION_FILE, CURVE_INDEX_FILE,
    CURVE_POSITION_RADIUS_FILE, GeometryBuilder, Instance, MESH_INDEX_SUFFIX, MESH_POSITION_SUFFIX,
    MaterialSpec, PrimitiveKind,
};
pub use lights::{
    Ephemeris, LightConfig, LightRig, LightSet, LightSource, SunModel, SunPosition,
};

pub fn crate_info() -> &'static str {
    "sunrise-scene v0.1.0"
}
