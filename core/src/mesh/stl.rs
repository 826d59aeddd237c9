//! Binary STL layout.
//!
//! 80-byte header, little-endian `u32` triangle count, then one 50-byte
//! record per triangle: normal and three vertices as `f32` triples followed
//! by a zero `u16` attribute.

use super::{triangulate, MeshTriangle};
use crate::geometry::Solid;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const HEADER_BYTES: usize = 80;
pub const COUNT_BYTES: usize = 4;
pub const TRIANGLE_RECORD_BYTES: usize = 50;

/// Header label. Must not begin with `solid`, which marks ASCII STL.
const HEADER_LABEL: &[u8] = b"partgen binary STL";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Geometry has no polygons")]
    NoTriangles,

    #[error("Geometry has non-finite coordinates")]
    NonFinite,

    #[error("Too many triangles for binary STL: {count}")]
    TooManyTriangles { count: usize },

    #[error("Malformed STL buffer: {0}")]
    Malformed(String),
}

/// Immutable encoded mesh. Cloning shares the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryArtifact {
    bytes: Arc<[u8]>,
}

impl BinaryArtifact {
    /// Wraps an existing buffer after checking its length against the count.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, EncodingError> {
        if bytes.len() < HEADER_BYTES + COUNT_BYTES {
            return Err(EncodingError::Malformed(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        let artifact = Self {
            bytes: bytes.into(),
        };
        let expected = encoded_len(artifact.triangle_count() as usize);
        if artifact.bytes.len() != expected {
            return Err(EncodingError::Malformed(format!(
                "expected {} bytes, found {}",
                expected,
                artifact.bytes.len()
            )));
        }
        Ok(artifact)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangle_count() == 0
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[..HEADER_BYTES]
    }

    pub fn triangle_count(&self) -> u32 {
        read_u32(&self.bytes, HEADER_BYTES)
    }

    /// Decodes every record back into a triangle.
    pub fn triangles(&self) -> impl Iterator<Item = MeshTriangle> + '_ {
        self.bytes[HEADER_BYTES + COUNT_BYTES..]
            .chunks_exact(TRIANGLE_RECORD_BYTES)
            .map(|record| {
                let vec3 = |at: usize| {
                    [
                        read_f32(record, at),
                        read_f32(record, at + 4),
                        read_f32(record, at + 8),
                    ]
                };
                MeshTriangle {
                    normal: vec3(0),
                    vertices: [vec3(12), vec3(24), vec3(36)],
                }
            })
    }
}

impl AsRef<[u8]> for BinaryArtifact {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

pub fn encoded_len(triangles: usize) -> usize {
    HEADER_BYTES + COUNT_BYTES + triangles * TRIANGLE_RECORD_BYTES
}

/// Encodes a solid as binary STL.
///
/// Every coordinate must survive the narrowing to `f32`. The triangle count
/// is known up front, so the records are written straight into one shared
/// buffer of the exact size.
pub fn encode(solid: &Solid) -> Result<BinaryArtifact, EncodingError> {
    if !fits_f32(solid) {
        return Err(EncodingError::NonFinite);
    }
    let count = solid.triangle_count();
    if count == 0 {
        return Err(EncodingError::NoTriangles);
    }
    let count_u32 =
        u32::try_from(count).map_err(|_| EncodingError::TooManyTriangles { count })?;
    let len = encoded_len(count);

    let mut bytes: Arc<[u8]> = std::iter::repeat(0u8).take(len).collect();
    let buf = Arc::get_mut(&mut bytes)
        .ok_or_else(|| EncodingError::Malformed("output buffer is shared".to_string()))?;
    let mut writer = RecordWriter { buf, at: 0 };
    writer.put(HEADER_LABEL)?;
    writer.at = HEADER_BYTES;
    writer.put(&count_u32.to_le_bytes())?;

    let mut written = 0usize;
    for triangle in triangulate(solid) {
        let floats = triangle.normal.iter().chain(triangle.vertices.iter().flatten());
        for c in floats {
            if !c.is_finite() {
                return Err(EncodingError::NonFinite);
            }
            writer.put(&c.to_le_bytes())?;
        }
        writer.put(&0u16.to_le_bytes())?;
        written += 1;
    }

    if written != count || writer.at != len {
        return Err(EncodingError::Malformed(format!(
            "wrote {} records in {} bytes, expected {} in {}",
            written, writer.at, count, len
        )));
    }
    debug!(triangles = count, bytes = len, "encoded binary STL");
    Ok(BinaryArtifact { bytes })
}

/// True when every vertex coordinate is finite and representable as `f32`.
fn fits_f32(solid: &Solid) -> bool {
    let limit = f32::MAX as f64;
    solid
        .vertices()
        .all(|p| p.coords.iter().all(|c| c.is_finite() && c.abs() <= limit))
}

struct RecordWriter<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl RecordWriter<'_> {
    fn put(&mut self, data: &[u8]) -> Result<(), EncodingError> {
        let end = self.at + data.len();
        let slot = self.buf.get_mut(self.at..end).ok_or_else(|| {
            EncodingError::Malformed(format!("write past the end of the buffer at byte {}", end))
        })?;
        slot.copy_from_slice(data);
        self.at = end;
        Ok(())
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    f32::from_le_bytes(raw)
}
