use std::path::PathBuf;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use sunrise_assets::LoadOptions;

/// Where scene geometry comes from and how it is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Directory of building meshes, one `{name}.mesh.*` pair per building.
    pub buildings_dir: Option<PathBuf>,
    /// Buildings loaded at most, in name order.
    pub building_limit: usize,
    pub building_scale: f32,
    pub building_color: Vec3,
    /// Directory holding the backdrop mesh and its vertex colors.
    pub background_dir: PathBuf,
    pub background_scale: f32,
    /// Directory holding road curves, if any.
    pub roads_dir: Option<PathBuf>,
    pub road_scale: f32,
    /// How geometry files are framed and read.
    pub load: LoadOptions,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            buildings_dir: None,
            building_limit: 29_999,
            building_scale: 1.0,
            building_color: Vec3::new(0.5, 0.7, 0.2),
            background_dir: PathBuf::from("data/Earth"),
            // Slightly under unit scale, beneath building footprints.
            background_scale: 0.999_996,
            roads_dir: None,
            road_scale: 1.0,
            load: LoadOptions::default(),
        }
    }
}
