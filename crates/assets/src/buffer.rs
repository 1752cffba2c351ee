use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytemuck::Pod;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

/// Upper bound on header dimension count; anything larger is a corrupt header.
const MAX_DIMENSIONS: u32 = 8;

/// Record layout of a geometry buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Position or color, three `f32`.
    Vec3f,
    /// Position plus radius, four `f32`.
    Vec4f,
    /// Triangle indices, three `u32`.
    Vec3u,
    /// Quad indices, four `u32`.
    Vec4u,
    /// Scalar index, one `u32`.
    U32,
}

impl ElementKind {
    /// Bytes per record.
    pub fn record_size(&self) -> usize {
        match self {
            ElementKind::Vec3f | ElementKind::Vec3u => 12,
            ElementKind::Vec4f | ElementKind::Vec4u => 16,
            ElementKind::U32 => 4,
        }
    }
}

/// Errors from loading or writing buffer files.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),
    #[error("corrupt data in {}: {detail}", path.display())]
    CorruptData { path: PathBuf, detail: String },
    #[error("record type of {size} bytes does not match {kind:?}")]
    RecordMismatch { kind: ElementKind, size: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BufferError {
    fn corrupt(path: &Path, detail: impl Into<String>) -> Self {
        BufferError::CorruptData {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

/// How the payload reaches memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Memory-map the file; pages are read lazily.
    #[default]
    Mapped,
    /// Read the payload into owned memory.
    Read,
}

/// Whether the file starts with a shape header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// `u32` dimension count, then one `u32` per dimension, then the payload.
    #[default]
    Headered,
    /// Bare payload; shape is `[len / record_size]`.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoadOptions {
    #[serde(default)]
    pub mode: LoadMode,
    #[serde(default)]
    pub framing: Framing,
}

enum Storage {
    Mapped { map: Mmap, offset: usize },
    // u32 words keep the payload 4-byte aligned for typed access.
    Owned(Vec<u32>),
}

/// Read-only shaped array of fixed-size records.
pub struct GeometryBuffer {
    path: PathBuf,
    kind: ElementKind,
    shape: Vec<usize>,
    byte_len: usize,
    storage: Storage,
}

impl std::fmt::Debug for GeometryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryBuffer")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("shape", &self.shape)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

impl GeometryBuffer {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of records, the product of the shape.
    pub fn len(&self) -> usize {
        self.byte_len / self.kind.record_size()
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len == 0
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped { .. })
    }

    /// Raw payload bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Mapped { map, offset } => &map[*offset..*offset + self.byte_len],
            Storage::Owned(words) => &bytemuck::cast_slice::<u32, u8>(words.as_slice())[..self.byte_len],
        }
    }

    /// Payload viewed as records of `T`, e.g. `[f32; 3]` for [`ElementKind::Vec3f`].
    pub fn records<T: Pod>(&self) -> Result<&[T], BufferError> {
        let size = std::mem::size_of::<T>();
        if size != self.kind.record_size() {
            return Err(BufferError::RecordMismatch {
                kind: self.kind,
                size,
            });
        }
        bytemuck::try_cast_slice(self.bytes()).map_err(|e| {
            BufferError::corrupt(&self.path, format!("unaligned payload: {e}"))
        })
    }
}

impl AsRef<[u8]> for GeometryBuffer {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

/// Loads geometry buffer files.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferLoader {
    options: LoadOptions,
}

impl BufferLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoadOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    /// Load `path` as records of `kind`.
    ///
    /// Fails with [`BufferError::ResourceNotFound`] if the file does not exist
    /// and [`BufferError::CorruptData`] if the declared payload size differs
    /// from the bytes actually present.
    pub fn load(&self, path: impl AsRef<Path>, kind: ElementKind) -> Result<GeometryBuffer, BufferError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BufferError::ResourceNotFound(path.to_path_buf())
            } else {
                BufferError::Io(e)
            }
        })?;
        let file_len = usize::try_from(file.metadata()?.len())
            .map_err(|_| BufferError::corrupt(path, "file larger than address space"))?;

        let mut reader = BufReader::new(file);
        let (shape, header_len) = match self.options.framing {
            Framing::Headered => read_header(&mut reader, path)?,
            Framing::Raw => {
                if file_len % kind.record_size() != 0 {
                    return Err(BufferError::corrupt(
                        path,
                        format!(
                            "{file_len} bytes is not a multiple of the {}-byte record",
                            kind.record_size()
                        ),
                    ));
                }
                (vec![file_len / kind.record_size()], 0)
            }
        };

        let expected = shape
            .iter()
            .try_fold(kind.record_size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| BufferError::corrupt(path, format!("shape {shape:?} overflows")))?;
        let actual = file_len - header_len;
        if expected != actual {
            return Err(BufferError::corrupt(
                path,
                format!("header {shape:?} declares {expected} payload bytes, file has {actual}"),
            ));
        }

        let mut file = reader.into_inner();
        let storage = match self.options.mode {
            // Safety: the map is read-only and the exporter never rewrites a published file.
            LoadMode::Mapped if file_len > 0 => Storage::Mapped {
                map: unsafe { Mmap::map(&file)? },
                offset: header_len,
            },
            LoadMode::Mapped | LoadMode::Read => {
                let mut words = vec![0u32; actual.div_ceil(4)];
                file.seek(SeekFrom::Start(header_len as u64))?;
                file.read_exact(&mut bytemuck::cast_slice_mut::<u32, u8>(words.as_mut_slice())[..actual])?;
                Storage::Owned(words)
            }
        };

        tracing::debug!(
            path = %path.display(),
            ?kind,
            ?shape,
            mapped = matches!(storage, Storage::Mapped { .. }),
            "buffer loaded"
        );
        Ok(GeometryBuffer {
            path: path.to_path_buf(),
            kind,
            shape,
            byte_len: actual,
            storage,
        })
    }

    /// Load and wrap for sharing between instances and engine data objects.
    pub fn load_shared(&self, path: impl AsRef<Path>, kind: ElementKind) -> Result<Arc<GeometryBuffer>, BufferError> {
        self.load(path, kind).map(Arc::new)
    }
}

fn read_header(reader: &mut impl Read, path: &Path) -> Result<(Vec<usize>, usize), BufferError> {
    let truncated = |e: std::io::Error| {
        if e.kind() == ErrorKind::UnexpectedEof {
            BufferError::corrupt(path, "truncated header")
        } else {
            BufferError::Io(e)
        }
    };
    let dims = reader.read_u32::<LittleEndian>().map_err(truncated)?;
    if dims > MAX_DIMENSIONS {
        return Err(BufferError::corrupt(
            path,
            format!("implausible dimension count {dims}"),
        ));
    }
    let mut shape = Vec::with_capacity(dims as usize);
    for _ in 0..dims {
        shape.push(reader.read_u32::<LittleEndian>().map_err(truncated)? as usize);
    }
    Ok((shape, 4 + 4 * dims as usize))
}

/// Write a headered buffer file.
pub fn write_buffer(
    path: impl AsRef<Path>,
    kind: ElementKind,
    shape: &[u32],
    payload: &[u8],
) -> Result<(), BufferError> {
    let path = path.as_ref();
    let expected = shape
        .iter()
        .fold(kind.record_size(), |acc, &d| acc * d as usize);
    if expected != payload.len() {
        return Err(BufferError::corrupt(
            path,
            format!("shape {shape:?} needs {expected} bytes, got {}", payload.len()),
        ));
    }
    let mut out = BufWriter::new(File::create(path)?);
    out.write_u32::<LittleEndian>(shape.len() as u32)?;
    for &d in shape {
        out.write_u32::<LittleEndian>(d)?;
    }
    out.write_all(payload)?;
    out.flush()?;
    Ok(())
}

/// Write typed records as a one-dimensional headered buffer.
pub fn write_records<T: Pod>(path: impl AsRef<Path>, kind: ElementKind, records: &[T]) -> Result<(), BufferError> {
    write_buffer(
        path,
        kind,
        &[records.len() as u32],
        bytemuck::cast_slice(records),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Vec<[f32; 3]> {
        vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.5]]
    }

    #[test]
    fn roundtrip_mapped_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.vec3f.bin");
        write_records(&path, ElementKind::Vec3f, &triangle()).unwrap();

        for mode in [LoadMode::Mapped, LoadMode::Read] {
            let loader = BufferLoader::with_options(LoadOptions {
                mode,
                ..LoadOptions::default()
            });
            let buf = loader.load(&path, ElementKind::Vec3f).unwrap();
            assert_eq!(buf.shape(), &[3]);
            assert_eq!(buf.len(), 3);
            assert_eq!(buf.is_mapped(), mode == LoadMode::Mapped);
            assert_eq!(buf.bytes(), bytemuck::cast_slice::<[f32; 3], u8>(triangle().as_slice()));
            assert_eq!(buf.records::<[f32; 3]>().unwrap(), triangle().as_slice());
        }
    }

    #[test]
    fn two_dimensional_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tex.bin");
        let texels = vec![[0.25f32, 0.5, 1.0]; 6];
        write_buffer(&path, ElementKind::Vec3f, &[2, 3], bytemuck::cast_slice(texels.as_slice())).unwrap();

        let buf = BufferLoader::new().load(&path, ElementKind::Vec3f).unwrap();
        assert_eq!(buf.shape(), &[2, 3]);
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn missing_file_is_resource_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = BufferLoader::new()
            .load(dir.path().join("absent.bin"), ElementKind::Vec3f)
            .unwrap_err();
        assert!(matches!(err, BufferError::ResourceNotFound(_)));
    }

    #[test]
    fn size_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes()); // declares 4 records
        bytes.extend_from_slice(&[0u8; 36]); // only 3 present
        std::fs::write(&path, &bytes).unwrap();

        let err = BufferLoader::new().load(&path, ElementKind::Vec3f).unwrap_err();
        assert!(matches!(err, BufferError::CorruptData { .. }), "{err}");
    }

    #[test]
    fn trailing_bytes_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.bin");
        write_records(&path, ElementKind::U32, &[1u32, 2, 3]).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(0);
        std::fs::write(&path, &bytes).unwrap();

        let err = BufferLoader::new().load(&path, ElementKind::U32).unwrap_err();
        assert!(matches!(err, BufferError::CorruptData { .. }));
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.bin");
        std::fs::write(&path, [2u8, 0, 0, 0, 7, 0]).unwrap();
        let err = BufferLoader::new().load(&path, ElementKind::U32).unwrap_err();
        assert!(matches!(err, BufferError::CorruptData { .. }));

        std::fs::write(&path, b"").unwrap();
        let err = BufferLoader::new().load(&path, ElementKind::U32).unwrap_err();
        assert!(matches!(err, BufferError::CorruptData { .. }));
    }

    #[test]
    fn raw_framing_infers_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.bin");
        let indices = [[0u32, 1, 2], [2, 1, 3]];
        std::fs::write(&path, bytemuck::cast_slice::<[u32; 3], u8>(&indices[..])).unwrap();

        let loader = BufferLoader::with_options(LoadOptions {
            framing: Framing::Raw,
            ..LoadOptions::default()
        });
        let buf = loader.load(&path, ElementKind::Vec3u).unwrap();
        assert_eq!(buf.shape(), &[2]);
        assert_eq!(buf.records::<[u32; 3]>().unwrap(), &indices);

        let err = loader.load(&path, ElementKind::Vec4u).unwrap_err();
        assert!(matches!(err, BufferError::CorruptData { .. }));
    }

    #[test]
    fn record_type_must_match_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pr.bin");
        write_records(&path, ElementKind::Vec4f, &[[0.0f32, 0.0, 0.0, 1.0]]).unwrap();
        let buf = BufferLoader::new().load(&path, ElementKind::Vec4f).unwrap();
        assert!(matches!(
            buf.records::<[f32; 3]>(),
            Err(BufferError::RecordMismatch { .. })
        ));
    }

    #[test]
    fn empty_payload_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        write_records::<[u32; 3]>(&path, ElementKind::Vec3u, &[]).unwrap();
        let buf = BufferLoader::new().load(&path, ElementKind::Vec3u).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.records::<[u32; 3]>().unwrap().len(), 0);
    }
}
