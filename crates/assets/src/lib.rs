//! Geometry buffer files: a small shape header followed by fixed-size records.
//!
//! # Layout
//! ```text
//! u32 LE   N            dimension count
//! u32 LE   shape[N]     one value per dimension
//! [u8]     payload      product(shape) * record_size bytes
//! ```
//!
//! # Invariants
//! - A loaded buffer is immutable; its payload length always equals `product(shape) * record_size`.
//! - Missing files surface as `ResourceNotFound`, size mismatches as `CorruptData`.

mod buffer;

pub use buffer::{
    BufferError, BufferLoader, ElementKind, Framing, GeometryBuffer, LoadMode, LoadOptions,
    write_buffer, write_records,
};

pub fn crate_info() -> &'static str {
    "sunrise-assets v0.1.0"
}
