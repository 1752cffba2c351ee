use std::path::Path;

use glam::Vec4;
use serde::{Deserialize, Serialize};
use sunrise_kernel::DEFAULT_INSTANCE_CAP;
use sunrise_scene::{LightConfig, SceneConfig};

use crate::error::ConfigError;
use crate::tile::DEFAULT_GHOST_MARGIN;

/// Engine renderer and camera settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub renderer: String,
    pub camera: String,
    pub pixel_samples: i32,
    pub background_color: Vec4,
    /// Attach a denoiser image operation to every frame buffer.
    pub denoise: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            renderer: "scivis".into(),
            camera: "perspective".into(),
            pixel_samples: 5,
            background_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            denoise: true,
        }
    }
}

/// Everything a [`RenderSession`](crate::RenderSession) is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub scene: SceneConfig,
    pub renderer: RendererConfig,
    pub lights: LightConfig,
    /// Ghost margin in pixels, shared by every tile.
    pub ghost_margin: u32,
    pub instance_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scene: SceneConfig::default(),
            renderer: RendererConfig::default(),
            lights: LightConfig::default(),
            ghost_margin: DEFAULT_GHOST_MARGIN,
            instance_cap: DEFAULT_INSTANCE_CAP,
        }
    }
}

impl SessionConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let text = std::fs::read_to_string(path)?;
        let config = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&text)?,
            "json" => serde_json::from_str(&text)?,
            _ => return Err(ConfigError::UnsupportedFormat(ext)),
        };
        tracing::debug!(path = %path.display(), "session config loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_setup() {
        let config = SessionConfig::default();
        assert_eq!(config.ghost_margin, 16);
        assert_eq!(config.instance_cap, 30_000);
        assert_eq!(config.renderer.renderer, "scivis");
        assert_eq!(config.renderer.pixel_samples, 5);
        assert_eq!(config.lights.sources.len(), 4);
    }

    #[test]
    fn yaml_overrides_only_given_fields() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "ghost_margin: 8\nscene:\n  background_dir: /data/earth\nrenderer:\n  denoise: false\n"
        )
        .unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.ghost_margin, 8);
        assert_eq!(config.scene.background_dir, Path::new("/data/earth"));
        assert!(!config.renderer.denoise);
        assert_eq!(config.renderer.pixel_samples, 5);
        assert_eq!(config.instance_cap, DEFAULT_INSTANCE_CAP);
    }

    #[test]
    fn json_light_sources() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"lights": {{"sources": [
                {{"kind": "ambient", "intensity": 0.2, "color": [1.0, 1.0, 1.0]}},
                {{"kind": "sun_tracking", "intensity": 3.0, "color": [1.0, 0.8, 0.4],
                  "model": {{"sun_sky": {{"turbidity": 8.0, "horizon_extension": 0.2, "albedo": 0.15}}}}}}
            ]}}}}"#
        )
        .unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.lights.sources.len(), 2);
        assert!(config.lights.sources[1].is_time_varying());
        assert_eq!(config.lights.sun_distance, 10_000.0);
    }

    #[test]
    fn unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(matches!(
            SessionConfig::load(file.path()),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "toml"
        ));
    }
}
