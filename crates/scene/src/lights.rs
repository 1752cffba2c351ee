use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glam::{DVec3, Vec3};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sunrise_assets::{BufferLoader, ElementKind, LoadOptions};
use sunrise_common::{GeoPoint, Timestamp};
use sunrise_kernel::{DataType, Handle, RendererContext, ResourceScope, SharedBytes, WorldLights};

use crate::error::SceneError;
use crate::geometry::TEXTURE_FORMAT_RGB32F;

/// Source of the sub-solar point for a given instant.
///
/// Celestial computation lives outside this crate; implementations must be
/// deterministic in their argument.
pub trait Ephemeris: Send + Sync {
    fn sun_subpoint(&self, time: Timestamp) -> GeoPoint;
}

impl<F> Ephemeris for F
where
    F: Fn(Timestamp) -> GeoPoint + Send + Sync,
{
    fn sun_subpoint(&self, time: Timestamp) -> GeoPoint {
        self(time)
    }
}

/// Engine model used for the sun-tracking light.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunModel {
    /// Plain directional light.
    #[default]
    Distant,
    /// Physical sun and sky; `up` is supplied per update.
    SunSky {
        turbidity: f32,
        horizon_extension: f32,
        albedo: f32,
    },
}

impl SunModel {
    fn subtype(&self) -> &'static str {
        match self {
            SunModel::Distant => "distant",
            SunModel::SunSky { .. } => "sunSky",
        }
    }
}

/// One light in the rig.
///
/// `Ambient`, `Point` and `EnvironmentMap` are built once. `Distant` and
/// `SunTracking` take their direction from the sun position and are rebuilt on
/// every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LightSource {
    Ambient {
        intensity: f32,
        color: Vec3,
        #[serde(default)]
        intensity_quantity: Option<i32>,
    },
    Point {
        intensity: f32,
        color: Vec3,
        position: Vec3,
        radius: f32,
        #[serde(default)]
        intensity_quantity: Option<i32>,
    },
    Distant {
        intensity: f32,
        color: Vec3,
        #[serde(default)]
        intensity_quantity: Option<i32>,
    },
    SunTracking {
        intensity: f32,
        color: Vec3,
        #[serde(default)]
        model: SunModel,
        #[serde(default)]
        intensity_quantity: Option<i32>,
    },
    EnvironmentMap {
        intensity: f32,
        path: PathBuf,
        #[serde(default)]
        load: LoadOptions,
        #[serde(default)]
        intensity_quantity: Option<i32>,
    },
}

impl LightSource {
    /// Engine code for how `intensity` is interpreted; `None` leaves the engine default.
    pub fn intensity_quantity(&self) -> Option<i32> {
        match self {
            LightSource::Ambient { intensity_quantity, .. }
            | LightSource::Point { intensity_quantity, .. }
            | LightSource::Distant { intensity_quantity, .. }
            | LightSource::SunTracking { intensity_quantity, .. }
            | LightSource::EnvironmentMap { intensity_quantity, .. } => *intensity_quantity,
        }
    }

    /// Whether the light is rebuilt on each update.
    pub fn is_time_varying(&self) -> bool {
        matches!(self, LightSource::Distant { .. } | LightSource::SunTracking { .. })
    }
}

/// Light rig parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    /// Lights in world list order.
    pub sources: Vec<LightSource>,
    /// Distance from the globe center at which the sun is placed.
    pub sun_distance: f64,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                LightSource::Ambient {
                    intensity: 0.15,
                    color: Vec3::new(1.0, 0.8, 0.4),
                    intensity_quantity: Some(6),
                },
                LightSource::Point {
                    intensity: 0.5,
                    color: Vec3::new(0.2, 0.5, 0.6),
                    position: Vec3::splat(100_000.0),
                    radius: 100_000.0,
                    intensity_quantity: Some(1),
                },
                LightSource::Distant {
                    intensity: 4.0,
                    color: Vec3::new(1.0, 0.8, 0.4),
                    intensity_quantity: Some(13),
                },
                LightSource::SunTracking {
                    intensity: 3.0,
                    color: Vec3::new(1.0, 0.8, 0.4),
                    model: SunModel::Distant,
                    intensity_quantity: Some(1),
                },
            ],
            sun_distance: 10_000.0,
        }
    }
}

/// Sun placement derived from a sub-solar point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    pub subpoint: GeoPoint,
    pub position: DVec3,
    /// Direction the light travels: from the sun toward the globe center.
    pub direction: DVec3,
}

impl SunPosition {
    pub fn from_subpoint(subpoint: GeoPoint, distance: f64) -> Self {
        let position = subpoint.to_unit_vector() * distance;
        Self {
            subpoint,
            position,
            direction: -position,
        }
    }
}

fn set_intensity(
    ctx: &RendererContext,
    light: Handle,
    source: &LightSource,
    intensity: f32,
) -> Result<(), SceneError> {
    ctx.set_float(light, "intensity", intensity)?;
    if let Some(quantity) = source.intensity_quantity() {
        ctx.set_int(light, "intensityQuantity", quantity)?;
    }
    Ok(())
}

/// Lights built once per rig; shared by every light set it produces.
struct StaticLights {
    handles: Vec<Option<Handle>>,
    scope: Mutex<ResourceScope>,
}

impl Drop for StaticLights {
    fn drop(&mut self) {
        self.scope.get_mut().close();
    }
}

/// Builds the static lights once and produces a fresh [`LightSet`] per instant.
pub struct LightRig {
    config: LightConfig,
    ephemeris: Arc<dyn Ephemeris>,
    statics: Arc<StaticLights>,
}

impl std::fmt::Debug for LightRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightRig")
            .field("sources", &self.config.sources.len())
            .field("sun_distance", &self.config.sun_distance)
            .finish()
    }
}

impl LightRig {
    /// Build and commit the static lights. An environment map's panorama is loaded here, once.
    pub fn build(
        ctx: &RendererContext,
        config: LightConfig,
        ephemeris: Arc<dyn Ephemeris>,
    ) -> Result<Self, SceneError> {
        let _span = tracing::info_span!("light_rig_build", sources = config.sources.len()).entered();
        let mut scope = ResourceScope::new("lights:static");
        let mut handles = Vec::with_capacity(config.sources.len());
        for source in &config.sources {
            let handle = match source {
                LightSource::Ambient { intensity, color, .. } => {
                    let light = ctx.new_light(&mut scope, "ambient")?;
                    set_intensity(ctx, light, source, *intensity)?;
                    ctx.set_vec3f(light, "color", *color)?;
                    ctx.commit(light)?;
                    Some(light)
                }
                LightSource::Point {
                    intensity,
                    color,
                    position,
                    radius,
                    ..
                } => {
                    let light = ctx.new_light(&mut scope, "sphere")?;
                    set_intensity(ctx, light, source, *intensity)?;
                    ctx.set_vec3f(light, "color", *color)?;
                    ctx.set_vec3f(light, "position", *position)?;
                    ctx.set_float(light, "radius", *radius)?;
                    ctx.commit(light)?;
                    Some(light)
                }
                LightSource::EnvironmentMap { intensity, path, load, .. } => {
                    let panorama = BufferLoader::with_options(*load).load_shared(path, ElementKind::Vec3f)?;
                    scope.hold(path.display().to_string(), Arc::clone(&panorama));
                    let count = panorama.len();
                    let bytes: SharedBytes = panorama;
                    let data = ctx.new_shared_data(&mut scope, bytes, DataType::Vec3f, count)?;
                    let texture = ctx.new_texture(&mut scope, "texture2d")?;
                    ctx.set_object(texture, "data", data)?;
                    ctx.set_uint(texture, "format", TEXTURE_FORMAT_RGB32F)?;
                    ctx.commit(texture)?;
                    let light = ctx.new_light(&mut scope, "hdri")?;
                    set_intensity(ctx, light, source, *intensity)?;
                    ctx.set_object(light, "map", texture)?;
                    ctx.commit(light)?;
                    Some(light)
                }
                LightSource::Distant { .. } | LightSource::SunTracking { .. } => None,
            };
            handles.push(handle);
        }
        tracing::info!(static_lights = handles.iter().flatten().count(), "light rig built");
        Ok(Self {
            config,
            ephemeris,
            statics: Arc::new(StaticLights {
                handles,
                scope: Mutex::new(scope),
            }),
        })
    }

    pub fn config(&self) -> &LightConfig {
        &self.config
    }

    /// Sun placement at `time`.
    pub fn sun_at(&self, time: Timestamp) -> SunPosition {
        SunPosition::from_subpoint(self.ephemeris.sun_subpoint(time), self.config.sun_distance)
    }

    /// Build the light set for `time`: the static lights plus freshly built
    /// time-varying lights.
    ///
    /// `up` feeds the sun-and-sky model's zenith. The result depends only on
    /// the arguments and the rig's configuration.
    pub fn update(
        &self,
        ctx: &RendererContext,
        time: Timestamp,
        up: DVec3,
    ) -> Result<LightSet, SceneError> {
        let start = Instant::now();
        let sun = self.sun_at(time);
        let position = sun.position.as_vec3();
        let direction = sun.direction.as_vec3();

        let mut scope = ResourceScope::new(format!("lights:{}", time.unix_seconds()));
        let mut handles = Vec::with_capacity(self.config.sources.len());
        for (source, fixed) in self.config.sources.iter().zip(&self.statics.handles) {
            let handle = match source {
                LightSource::Distant { intensity, color, .. } => {
                    let light = ctx.new_light(&mut scope, "distant")?;
                    set_intensity(ctx, light, source, *intensity)?;
                    ctx.set_vec3f(light, "color", *color)?;
                    ctx.set_vec3f(light, "direction", direction)?;
                    ctx.commit(light)?;
                    light
                }
                LightSource::SunTracking {
                    intensity,
                    color,
                    model,
                    ..
                } => {
                    let light = ctx.new_light(&mut scope, model.subtype())?;
                    set_intensity(ctx, light, source, *intensity)?;
                    ctx.set_vec3f(light, "color", *color)?;
                    if let SunModel::SunSky {
                        turbidity,
                        horizon_extension,
                        albedo,
                    } = model
                    {
                        ctx.set_float(light, "turbidity", *turbidity)?;
                        ctx.set_float(light, "horizonExtension", *horizon_extension)?;
                        ctx.set_float(light, "albedo", *albedo)?;
                        ctx.set_vec3f(light, "up", up.as_vec3())?;
                    }
                    ctx.set_vec3f(light, "position", position)?;
                    ctx.set_vec3f(light, "direction", direction)?;
                    ctx.commit(light)?;
                    light
                }
                _ => match fixed {
                    Some(handle) => *handle,
                    None => continue,
                },
            };
            handles.push(handle);
        }

        tracing::debug!(
            time = time.unix_seconds(),
            lat = sun.subpoint.lat,
            lng = sun.subpoint.lng,
            lights = handles.len(),
            elapsed_ns = start.elapsed().as_nanos() as u64,
            "light set built"
        );
        Ok(LightSet {
            time,
            sun,
            handles,
            scope,
            _statics: Arc::clone(&self.statics),
        })
    }
}

/// Lights for one instant, ready to be swapped into a world.
///
/// Dropping the set releases only its time-varying lights; static lights stay
/// alive while the rig or any other set still refers to them.
pub struct LightSet {
    time: Timestamp,
    sun: SunPosition,
    handles: Vec<Handle>,
    scope: ResourceScope,
    _statics: Arc<StaticLights>,
}

impl std::fmt::Debug for LightSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightSet")
            .field("time", &self.time)
            .field("handles", &self.handles)
            .field("scope", &self.scope)
            .finish()
    }
}

impl LightSet {
    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn sun(&self) -> SunPosition {
        self.sun
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl WorldLights for LightSet {
    fn handles(&self) -> Vec<Handle> {
        self.handles.clone()
    }
}
