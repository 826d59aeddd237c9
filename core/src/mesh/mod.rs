//! Triangle meshes and the binary STL artifact.

pub mod stl;

#[cfg(test)]
mod tests_stl;

pub use stl::{encode, BinaryArtifact, EncodingError, HEADER_BYTES, TRIANGLE_RECORD_BYTES};

use crate::geometry::{Point3, Solid, Vector3};
use serde::{Deserialize, Serialize};

/// One output facet: unit normal (zero when degenerate) and three corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshTriangle {
    pub normal: [f32; 3],
    pub vertices: [[f32; 3]; 3],
}

impl MeshTriangle {
    pub fn from_points(a: &Point3, b: &Point3, c: &Point3) -> Self {
        let v1 = b - a;
        let v2 = c - a;
        let cross = v1.cross(&v2);
        let len = cross.norm();
        let normal = if len.is_finite() && len > 0.0 {
            cross / len
        } else {
            Vector3::zeros()
        };
        Self {
            normal: [normal.x as f32, normal.y as f32, normal.z as f32],
            vertices: [to_f32(a), to_f32(b), to_f32(c)],
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.normal == [0.0; 3]
    }
}

fn to_f32(p: &Point3) -> [f32; 3] {
    [p.x as f32, p.y as f32, p.z as f32]
}

/// Fan triangulation anchored at each polygon's first vertex: an n-gon
/// yields n-2 triangles, in polygon order.
pub fn triangulate(solid: &Solid) -> impl Iterator<Item = MeshTriangle> + '_ {
    solid.polygons().iter().flat_map(|polygon| {
        let v = &polygon.vertices;
        (1..v.len().saturating_sub(1)).map(move |i| MeshTriangle::from_points(&v[0], &v[i], &v[i + 1]))
    })
}
