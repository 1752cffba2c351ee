use std::fmt;
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use sunrise_common::Affine;

use crate::scope::ResourceScope;

/// Opaque reference to an object living inside the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle#{}", self.0)
    }
}

/// Engine object categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Data,
    Geometry,
    Material,
    Texture,
    Light,
    GeometricModel,
    Group,
    Instance,
    World,
    Renderer,
    Camera,
    FrameBuffer,
    ImageOperation,
}

/// Element type of a shared data array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float,
    UInt,
    Vec3f,
    Vec4f,
    Vec3u,
    Vec4u,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::Float | DataType::UInt => 4,
            DataType::Vec3f | DataType::Vec3u => 12,
            DataType::Vec4f | DataType::Vec4u => 16,
        }
    }
}

/// Pixel format of a framebuffer color channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 8-bit RGBA, sRGB encoded.
    #[default]
    Srgba,
    /// 8-bit RGBA, linear.
    Rgba8,
}

/// Typed object parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Object(Handle),
    Vec2f([f32; 2]),
    Vec3f([f32; 3]),
    Vec4f([f32; 4]),
    Float(f32),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Affine([f32; 12]),
}

/// Bytes an engine data object may borrow for as long as it lives.
pub type SharedBytes = Arc<dyn AsRef<[u8]> + Send + Sync>;

/// Errors reported by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown or released handle {0:?}")]
    UnknownHandle(Handle),
    #[error("engine rejected {object}: {reason}")]
    Rejected { object: String, reason: String },
    #[error("render failed: {0}")]
    RenderFailed(String),
}

/// Capability surface of the external ray-tracing engine.
///
/// Objects are created, parameterized, committed, and released. A committed
/// object is what subsequent renders observe; parameters set after a commit are
/// pending until the next one. The engine is single-threaded with respect to a
/// given world/camera/renderer triple: callers serialize renders against it.
pub trait Engine: Send + Sync {
    /// Create an object. `subtype` selects the variant ("mesh", "distant", ...).
    fn new_object(&self, kind: ObjectKind, subtype: Option<&str>) -> Result<Handle, EngineError>;

    /// Create a data array over shared bytes without copying them.
    fn new_shared_data(
        &self,
        bytes: SharedBytes,
        data_type: DataType,
        count: usize,
    ) -> Result<Handle, EngineError>;

    /// Create a data array holding object references.
    fn new_object_list(&self, kind: ObjectKind, items: &[Handle]) -> Result<Handle, EngineError>;

    fn new_frame_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Handle, EngineError>;

    fn set_param(&self, handle: Handle, name: &str, value: Param) -> Result<(), EngineError>;

    fn commit(&self, handle: Handle) -> Result<(), EngineError>;

    /// Render one frame. Blocks until the frame is complete; returns the variance estimate.
    fn render_frame_blocking(
        &self,
        frame_buffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError>;

    /// Map the color channel and copy it out as tightly packed RGBA rows.
    fn map_frame_buffer(&self, frame_buffer: Handle) -> Result<Vec<u8>, EngineError>;

    fn unmap_frame_buffer(&self, frame_buffer: Handle);

    fn release(&self, handle: Handle);
}

/// Explicit engine context, built once and passed by reference.
///
/// Every constructor registers the new handle with the given scope, so each
/// handle is released exactly once, by that scope.
#[derive(Clone)]
pub struct RendererContext {
    engine: Arc<dyn Engine>,
}

impl fmt::Debug for RendererContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererContext").finish_non_exhaustive()
    }
}

impl RendererContext {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Register an already created handle for release by `scope`.
    pub fn track(&self, scope: &mut ResourceScope, handle: Handle) -> Handle {
        let engine = Arc::clone(&self.engine);
        scope.acquire(handle, move |h| engine.release(h))
    }

    fn create(
        &self,
        scope: &mut ResourceScope,
        kind: ObjectKind,
        subtype: Option<&str>,
    ) -> Result<Handle, EngineError> {
        let handle = self.engine.new_object(kind, subtype)?;
        tracing::trace!(?kind, ?subtype, ?handle, "created");
        Ok(self.track(scope, handle))
    }

    pub fn new_geometry(&self, scope: &mut ResourceScope, subtype: &str) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Geometry, Some(subtype))
    }

    pub fn new_material(&self, scope: &mut ResourceScope, subtype: &str) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Material, Some(subtype))
    }

    pub fn new_texture(&self, scope: &mut ResourceScope, subtype: &str) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Texture, Some(subtype))
    }

    pub fn new_light(&self, scope: &mut ResourceScope, subtype: &str) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Light, Some(subtype))
    }

    pub fn new_geometric_model(&self, scope: &mut ResourceScope) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::GeometricModel, None)
    }

    pub fn new_group(&self, scope: &mut ResourceScope) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Group, None)
    }

    pub fn new_instance(&self, scope: &mut ResourceScope) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Instance, None)
    }

    pub fn new_world(&self, scope: &mut ResourceScope) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::World, None)
    }

    pub fn new_renderer(&self, scope: &mut ResourceScope, subtype: &str) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Renderer, Some(subtype))
    }

    pub fn new_camera(&self, scope: &mut ResourceScope, subtype: &str) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::Camera, Some(subtype))
    }

    pub fn new_image_operation(
        &self,
        scope: &mut ResourceScope,
        subtype: &str,
    ) -> Result<Handle, EngineError> {
        self.create(scope, ObjectKind::ImageOperation, Some(subtype))
    }

    pub fn new_frame_buffer(
        &self,
        scope: &mut ResourceScope,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Handle, EngineError> {
        let handle = self.engine.new_frame_buffer(width, height, format)?;
        Ok(self.track(scope, handle))
    }

    pub fn new_shared_data(
        &self,
        scope: &mut ResourceScope,
        bytes: SharedBytes,
        data_type: DataType,
        count: usize,
    ) -> Result<Handle, EngineError> {
        let handle = self.engine.new_shared_data(bytes, data_type, count)?;
        let handle = self.track(scope, handle);
        self.engine.commit(handle)?;
        Ok(handle)
    }

    pub fn new_object_list(
        &self,
        scope: &mut ResourceScope,
        kind: ObjectKind,
        items: &[Handle],
    ) -> Result<Handle, EngineError> {
        let handle = self.engine.new_object_list(kind, items)?;
        let handle = self.track(scope, handle);
        self.engine.commit(handle)?;
        Ok(handle)
    }

    pub fn set_object(&self, handle: Handle, name: &str, object: Handle) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Object(object))
    }

    pub fn set_vec2f(&self, handle: Handle, name: &str, v: Vec2) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Vec2f(v.to_array()))
    }

    pub fn set_vec3f(&self, handle: Handle, name: &str, v: Vec3) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Vec3f(v.to_array()))
    }

    pub fn set_vec4f(&self, handle: Handle, name: &str, v: Vec4) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Vec4f(v.to_array()))
    }

    pub fn set_float(&self, handle: Handle, name: &str, v: f32) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Float(v))
    }

    pub fn set_int(&self, handle: Handle, name: &str, v: i32) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Int(v))
    }

    pub fn set_uint(&self, handle: Handle, name: &str, v: u32) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::UInt(v))
    }

    pub fn set_bool(&self, handle: Handle, name: &str, v: bool) -> Result<(), EngineError> {
        self.engine.set_param(handle, name, Param::Bool(v))
    }

    pub fn set_affine(&self, handle: Handle, name: &str, affine: &Affine) -> Result<(), EngineError> {
        self.engine
            .set_param(handle, name, Param::Affine(affine.to_cols_array()))
    }

    pub fn commit(&self, handle: Handle) -> Result<(), EngineError> {
        self.engine.commit(handle)
    }

    pub fn render_frame_blocking(
        &self,
        frame_buffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError> {
        self.engine
            .render_frame_blocking(frame_buffer, renderer, camera, world)
    }

    /// Map, copy and unmap the color channel of `frame_buffer`.
    pub fn read_frame_buffer(&self, frame_buffer: Handle) -> Result<Vec<u8>, EngineError> {
        let pixels = self.engine.map_frame_buffer(frame_buffer)?;
        self.engine.unmap_frame_buffer(frame_buffer);
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugEngine;

    #[test]
    fn data_type_sizes() {
        assert_eq!(DataType::Vec3f.size(), 12);
        assert_eq!(DataType::Vec4u.size(), 16);
        assert_eq!(DataType::UInt.size(), 4);
    }

    #[test]
    fn context_handles_are_released_by_scope() {
        let engine = Arc::new(DebugEngine::new());
        let ctx = RendererContext::new(engine.clone());
        {
            let mut scope = ResourceScope::new("ctx");
            let geometry = ctx.new_geometry(&mut scope, "mesh").unwrap();
            let group = ctx.new_group(&mut scope).unwrap();
            ctx.set_object(group, "geometry", geometry).unwrap();
            ctx.commit(group).unwrap();
            assert_eq!(engine.stats().live, 2);
        }
        let stats = engine.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.acquired, stats.released);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn shared_data_is_committed_on_creation() {
        let engine = Arc::new(DebugEngine::new());
        let ctx = RendererContext::new(engine.clone());
        let mut scope = ResourceScope::new("data");
        let bytes: SharedBytes = Arc::new(vec![0u8; 24]);
        let data = ctx
            .new_shared_data(&mut scope, bytes, DataType::Vec3f, 2)
            .unwrap();
        assert!(engine.is_committed(data));
    }
}
