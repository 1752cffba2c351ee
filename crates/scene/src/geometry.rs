use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use sunrise_assets::{BufferLoader, ElementKind, GeometryBuffer};
use sunrise_common::{Affine, InstanceId};
use sunrise_kernel::{
    DataType, Handle, ObjectKind, RendererContext, ResourceScope, SharedBytes, WorldInstance,
};

use crate::error::SceneError;

/// `texture2d` format code for three `f32` channels.
pub(crate) const TEXTURE_FORMAT_RGB32F: u32 = 5;

pub const MESH_POSITION_SUFFIX: &str = ".mesh.vec3f[].vertex.position.bin";
pub const MESH_INDEX_SUFFIX: &str = ".mesh.vec3ui[].vertex.index.bin";
pub const BACKGROUND_POSITION_FILE: &str = "OSPGeometry.mesh.vec3f[].vertex.position.bin";
pub const BACKGROUND_COLOR_FILE: &str = "OSPGeometry.mesh.vec3f[].vertex.color.bin";
pub const BACKGROUND_INDEX_FILE: &str = "OSPGeometry.mesh.vec3ui[].index.bin";
pub const CURVE_POSITION_RADIUS_FILE: &str = "OSPGeometry.curve.vertex.position_radius.vec4f[].bin";
pub const CURVE_INDEX_FILE: &str = "OSPGeometry.curve.index.uint[].bin";

/// Geometry variant of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    TriangleMesh,
    Curve,
    Background,
}

impl PrimitiveKind {
    fn geometry_subtype(&self) -> &'static str {
        match self {
            PrimitiveKind::TriangleMesh | PrimitiveKind::Background => "mesh",
            PrimitiveKind::Curve => "curve",
        }
    }
}

/// Surface description attached to a geometric model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialSpec {
    /// Uniform diffuse albedo.
    Constant { kd: Vec3 },
    /// Diffuse albedo sampled from the per-vertex color buffer.
    VertexColorTexture { ns: f32 },
}

/// One vertex attribute: the engine parameter it feeds and the file it comes from.
#[derive(Debug, Clone)]
struct Attribute {
    param: &'static str,
    path: PathBuf,
    kind: ElementKind,
}

/// A committed engine instance with everything it depends on.
///
/// The instance scope holds the loaded buffers, the shared data objects over
/// them and the instance handle. Closing it (or dropping the instance)
/// releases them newest first.
pub struct Instance {
    id: InstanceId,
    handle: Handle,
    kind: PrimitiveKind,
    label: String,
    records: usize,
    scope: ResourceScope,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish()
    }
}

impl Instance {
    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Total records across the loaded buffers.
    pub fn record_count(&self) -> usize {
        self.records
    }

    pub fn close(&mut self) {
        self.scope.close();
    }
}

impl WorldInstance for Instance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn handle(&self) -> Handle {
        self.handle
    }

    fn is_background(&self) -> bool {
        self.kind == PrimitiveKind::Background
    }
}

fn data_type(kind: ElementKind) -> DataType {
    match kind {
        ElementKind::Vec3f => DataType::Vec3f,
        ElementKind::Vec4f => DataType::Vec4f,
        ElementKind::Vec3u => DataType::Vec3u,
        ElementKind::Vec4u => DataType::Vec4u,
        ElementKind::U32 => DataType::UInt,
    }
}

/// Turns geometry buffer files into committed engine instances.
pub struct GeometryBuilder<'a> {
    ctx: &'a RendererContext,
    loader: BufferLoader,
}

impl<'a> GeometryBuilder<'a> {
    pub fn new(ctx: &'a RendererContext, loader: BufferLoader) -> Self {
        Self { ctx, loader }
    }

    pub fn loader(&self) -> &BufferLoader {
        &self.loader
    }

    /// Building mesh `name` under `dir` with a constant albedo.
    pub fn triangle_mesh(
        &self,
        dir: &Path,
        name: &str,
        kd: Vec3,
        transform: Affine,
    ) -> Result<Instance, SceneError> {
        let attributes = vec![
            Attribute {
                param: "vertex.position",
                path: dir.join(format!("{name}{MESH_POSITION_SUFFIX}")),
                kind: ElementKind::Vec3f,
            },
            Attribute {
                param: "index",
                path: dir.join(format!("{name}{MESH_INDEX_SUFFIX}")),
                kind: ElementKind::Vec3u,
            },
        ];
        self.assemble(
            name,
            PrimitiveKind::TriangleMesh,
            &attributes,
            Some(MaterialSpec::Constant { kd }),
            &transform,
        )
    }

    /// Textured backdrop under `dir`; the vertex colors double as its texture.
    pub fn background(&self, dir: &Path, transform: Affine) -> Result<Instance, SceneError> {
        let attributes = vec![
            Attribute {
                param: "vertex.position",
                path: dir.join(BACKGROUND_POSITION_FILE),
                kind: ElementKind::Vec3f,
            },
            Attribute {
                param: "vertex.color",
                path: dir.join(BACKGROUND_COLOR_FILE),
                kind: ElementKind::Vec3f,
            },
            Attribute {
                param: "index",
                path: dir.join(BACKGROUND_INDEX_FILE),
                kind: ElementKind::Vec3u,
            },
        ];
        self.assemble(
            "background",
            PrimitiveKind::Background,
            &attributes,
            Some(MaterialSpec::VertexColorTexture { ns: 1.0 }),
            &transform,
        )
    }

    /// Round curves (roads) under `dir`, drawn without a material.
    pub fn curves(&self, dir: &Path, transform: Affine) -> Result<Instance, SceneError> {
        let attributes = vec![
            Attribute {
                param: "vertex.position_radius",
                path: dir.join(CURVE_POSITION_RADIUS_FILE),
                kind: ElementKind::Vec4f,
            },
            Attribute {
                param: "index",
                path: dir.join(CURVE_INDEX_FILE),
                kind: ElementKind::U32,
            },
        ];
        self.assemble("curves", PrimitiveKind::Curve, &attributes, None, &transform)
    }

    fn assemble(
        &self,
        label: &str,
        kind: PrimitiveKind,
        attributes: &[Attribute],
        material: Option<MaterialSpec>,
        transform: &Affine,
    ) -> Result<Instance, SceneError> {
        let _span = tracing::debug_span!("build_instance", label, ?kind).entered();
        let start = Instant::now();
        let ctx = self.ctx;

        // Declared first so that on an early return the staging objects go before the data they reference.
        let mut scope = ResourceScope::new(format!("instance:{label}"));
        let mut staging = ResourceScope::new(format!("staging:{label}"));

        let mut data = Vec::with_capacity(attributes.len());
        let mut records = 0;
        for attr in attributes {
            let buffer: Arc<GeometryBuffer> = self.loader.load_shared(&attr.path, attr.kind)?;
            records += buffer.len();
            scope.hold(attr.path.display().to_string(), Arc::clone(&buffer));
            let count = buffer.len();
            let bytes: SharedBytes = buffer;
            let handle = ctx.new_shared_data(&mut scope, bytes, data_type(attr.kind), count)?;
            data.push((attr.param, handle));
        }

        let geometry = ctx.new_geometry(&mut staging, kind.geometry_subtype())?;
        for (param, handle) in &data {
            ctx.set_object(geometry, param, *handle)?;
        }
        ctx.commit(geometry)?;

        let model = ctx.new_geometric_model(&mut staging)?;
        ctx.set_object(model, "geometry", geometry)?;
        if let Some(spec) = material {
            let material = self.material(&mut staging, spec, &data)?;
            ctx.set_object(model, "material", material)?;
        }
        ctx.commit(model)?;

        let models = ctx.new_object_list(&mut staging, ObjectKind::GeometricModel, &[model])?;
        let group = ctx.new_group(&mut staging)?;
        ctx.set_object(group, "geometry", models)?;
        ctx.commit(group)?;

        let handle = ctx.new_instance(&mut scope)?;
        ctx.set_object(handle, "group", group)?;
        ctx.set_affine(handle, "transform", transform)?;
        ctx.commit(handle)?;

        staging.close();
        tracing::debug!(
            records,
            elapsed_ns = start.elapsed().as_nanos() as u64,
            ?handle,
            "instance committed"
        );

        Ok(Instance {
            id: InstanceId::new(),
            handle,
            kind,
            label: label.to_owned(),
            records,
            scope,
        })
    }

    fn material(
        &self,
        staging: &mut ResourceScope,
        spec: MaterialSpec,
        data: &[(&'static str, Handle)],
    ) -> Result<Handle, SceneError> {
        let ctx = self.ctx;
        let material = ctx.new_material(staging, "obj")?;
        match spec {
            MaterialSpec::Constant { kd } => {
                ctx.set_vec3f(material, "kd", kd)?;
            }
            MaterialSpec::VertexColorTexture { ns } => {
                let colors = data
                    .iter()
                    .find(|(param, _)| *param == "vertex.color")
                    .map(|(_, handle)| *handle)
                    .ok_or_else(|| sunrise_kernel::EngineError::Rejected {
                        object: "material".into(),
                        reason: "textured material needs a vertex.color buffer".into(),
                    })?;
                let texture = ctx.new_texture(staging, "texture2d")?;
                ctx.set_object(texture, "data", colors)?;
                ctx.set_uint(texture, "format", TEXTURE_FORMAT_RGB32F)?;
                ctx.commit(texture)?;
                ctx.set_object(material, "map_kd", texture)?;
                ctx.set_float(material, "ns", ns)?;
            }
        }
        ctx.commit(material)?;
        Ok(material)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use sunrise_assets::{ElementKind, write_records};

    use super::*;

    pub fn write_mesh(dir: &Path, name: &str) {
        let positions = [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
        let indices = [[0u32, 1, 2], [1, 3, 2]];
        write_records(
            dir.join(format!("{name}{MESH_POSITION_SUFFIX}")),
            ElementKind::Vec3f,
            &positions[..],
        )
        .unwrap();
        write_records(
            dir.join(format!("{name}{MESH_INDEX_SUFFIX}")),
            ElementKind::Vec3u,
            &indices[..],
        )
        .unwrap();
    }

    pub fn write_background(dir: &Path) {
        let positions = [[-1.0f32, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]];
        let colors = [[0.1f32, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9], [1.0, 1.0, 1.0]];
        let indices = [[0u32, 1, 2], [0, 2, 3]];
        write_records(dir.join(BACKGROUND_POSITION_FILE), ElementKind::Vec3f, &positions[..]).unwrap();
        write_records(dir.join(BACKGROUND_COLOR_FILE), ElementKind::Vec3f, &colors[..]).unwrap();
        write_records(dir.join(BACKGROUND_INDEX_FILE), ElementKind::Vec3u, &indices[..]).unwrap();
    }

    pub fn write_curves(dir: &Path) {
        let points = [[0.0f32, 0.0, 0.0, 0.1], [1.0, 0.0, 0.0, 0.1], [2.0, 1.0, 0.0, 0.1], [3.0, 1.0, 0.0, 0.1]];
        let index = [0u32];
        write_records(dir.join(CURVE_POSITION_RADIUS_FILE), ElementKind::Vec4f, &points[..]).unwrap();
        write_records(dir.join(CURVE_INDEX_FILE), ElementKind::U32, &index[..]).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use sunrise_assets::BufferError;
    use sunrise_kernel::{DebugEngine, Param};

    fn setup() -> (Arc<DebugEngine>, RendererContext) {
        let engine = Arc::new(DebugEngine::new());
        let ctx = RendererContext::new(engine.clone());
        (engine, ctx)
    }

    #[test]
    fn mesh_instance_keeps_only_its_own_scope_alive() {
        let dir = tempfile::tempdir().unwrap();
        write_mesh(dir.path(), "b1");
        let (engine, ctx) = setup();
        let builder = GeometryBuilder::new(&ctx, BufferLoader::new());

        let mut instance = builder
            .triangle_mesh(dir.path(), "b1", Vec3::new(0.5, 0.7, 0.2), Affine::uniform(1.0))
            .unwrap();
        assert_eq!(instance.kind(), PrimitiveKind::TriangleMesh);
        assert_eq!(instance.record_count(), 6);
        assert!(!instance.is_background());
        assert!(engine.is_committed(instance.handle()));

        // Instance plus two data objects; the staging objects are gone.
        assert_eq!(engine.stats().live, 3);
        assert_eq!(engine.live_count(ObjectKind::Geometry), 0);
        assert_eq!(engine.live_count(ObjectKind::Group), 0);
        assert_eq!(
            engine.param(instance.handle(), "transform"),
            Some(Param::Affine(Affine::uniform(1.0).to_cols_array()))
        );

        instance.close();
        assert_eq!(engine.stats().live, 0);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn background_uses_vertex_color_texture() {
        let dir = tempfile::tempdir().unwrap();
        write_background(dir.path());
        let (engine, ctx) = setup();
        let builder = GeometryBuilder::new(&ctx, BufferLoader::new());

        let instance = builder
            .background(dir.path(), Affine::mirrored_xy(0.5))
            .unwrap();
        assert!(instance.is_background());
        assert_eq!(
            engine.param(instance.handle(), "transform"),
            Some(Param::Affine(Affine::mirrored_xy(0.5).to_cols_array()))
        );
        assert_eq!(engine.live_count(ObjectKind::Texture), 0);
        assert_eq!(engine.live_count(ObjectKind::Data), 3);
        drop(instance);
        assert_eq!(engine.stats().live, 0);
    }

    #[test]
    fn curves_build_without_material() {
        let dir = tempfile::tempdir().unwrap();
        write_curves(dir.path());
        let (engine, ctx) = setup();
        let builder = GeometryBuilder::new(&ctx, BufferLoader::new());

        let instance = builder.curves(dir.path(), Affine::mirrored_xy(1.0)).unwrap();
        assert_eq!(instance.kind(), PrimitiveKind::Curve);
        assert_eq!(instance.record_count(), 5);
        assert_eq!(engine.live_count(ObjectKind::Material), 0);
    }

    #[test]
    fn missing_file_unwinds_partial_build() {
        let dir = tempfile::tempdir().unwrap();
        write_mesh(dir.path(), "b1");
        std::fs::remove_file(dir.path().join(format!("b1{MESH_INDEX_SUFFIX}"))).unwrap();
        let (engine, ctx) = setup();
        let builder = GeometryBuilder::new(&ctx, BufferLoader::new());

        let err = builder
            .triangle_mesh(dir.path(), "b1", Vec3::ONE, Affine::default())
            .unwrap_err();
        assert!(matches!(err, SceneError::Buffer(BufferError::ResourceNotFound(_))));
        let stats = engine.stats();
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.live, 0);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn corrupt_buffer_is_reported_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_background(dir.path());
        std::fs::write(dir.path().join(BACKGROUND_COLOR_FILE), [1u8, 0, 0, 0, 4, 0, 0, 0]).unwrap();
        let (engine, ctx) = setup();
        let builder = GeometryBuilder::new(&ctx, BufferLoader::new());

        let err = builder.background(dir.path(), Affine::default()).unwrap_err();
        assert!(matches!(err, SceneError::Buffer(BufferError::CorruptData { .. })));
        assert_eq!(engine.stats().live, 0);
    }
}
