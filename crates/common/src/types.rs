use glam::{DVec3, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for an instance placed in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Axis-aligned placement: per-axis scale followed by a translation.
///
/// No rotation: exported geometry is already in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub scale: Vec3,
    pub translate: Vec3,
}

impl Default for Affine {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            translate: Vec3::ZERO,
        }
    }
}

impl Affine {
    /// Uniform scale on all three axes.
    pub fn uniform(scale: f32) -> Self {
        Self {
            scale: Vec3::splat(scale),
            ..Self::default()
        }
    }

    /// Uniform scale with X and Y mirrored, the frame used by exported backdrops and curves.
    pub fn mirrored_xy(scale: f32) -> Self {
        Self {
            scale: Vec3::new(-scale, -scale, scale),
            ..Self::default()
        }
    }

    pub fn with_translation(mut self, translate: Vec3) -> Self {
        self.translate = translate;
        self
    }

    /// Column-major 3x4 layout: three linear columns then the translation.
    pub fn to_cols_array(&self) -> [f32; 12] {
        let s = self.scale;
        let t = self.translate;
        [
            s.x, 0.0, 0.0, //
            0.0, s.y, 0.0, //
            0.0, 0.0, s.z, //
            t.x, t.y, t.z,
        ]
    }

    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        p * self.scale + self.translate
    }
}

/// A point on the globe in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Unit vector from the globe center through this point.
    ///
    /// Z points to the north pole, X to (0°, 0°), Y to (0°, 90°E).
    pub fn to_unit_vector(&self) -> DVec3 {
        let (lat, lng) = (self.lat.to_radians(), self.lng.to_radians());
        DVec3::new(lat.cos() * lng.cos(), lat.cos() * lng.sin(), lat.sin())
    }
}

/// Seconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// 2023-06-01T00:00:00Z, the day the hour-of-day requests are anchored to.
    pub const REFERENCE_DAY: Timestamp = Timestamp(1_685_577_600);

    pub fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Reference day plus `hour` hours. Hours past 24 roll into the next day.
    pub fn from_reference_hour(hour: u32) -> Self {
        Self(Self::REFERENCE_DAY.0 + i64::from(hour) * 3600)
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0
    }

    /// Fractional UTC hour of day in `[0, 24)`.
    pub fn utc_hour(&self) -> f64 {
        self.0.rem_euclid(86_400) as f64 / 3600.0
    }
}
