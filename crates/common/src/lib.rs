//! Shared types: instance identity, affine placement, geographic points and timestamps.
//!
//! # Invariants
//! - Types here carry no engine handles and are freely copyable.

mod types;

pub use types::{Affine, GeoPoint, InstanceId, Timestamp};

pub fn crate_info() -> &'static str {
    "sunrise-common v0.1.0"
}
