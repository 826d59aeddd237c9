use super::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Oriented plane `normal · p = w`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vector3,
    pub w: f64,
}

impl Plane {
    /// Best-fit plane of a vertex loop (Newell's method).
    ///
    /// Returns `None` when the loop has no area.
    pub fn from_vertices(vertices: &[Point3]) -> Option<Self> {
        if vertices.len() < 3 {
            return None;
        }
        let normal = newell_normal(vertices);
        let len = normal.norm();
        if !len.is_finite() || len < 1e-12 {
            return None;
        }
        let normal = normal / len;

        let mut centroid = Vector3::zeros();
        for v in vertices {
            centroid += v.coords;
        }
        centroid /= vertices.len() as f64;

        Some(Self {
            normal,
            w: normal.dot(&centroid),
        })
    }

    pub fn flip(&mut self) {
        self.normal = -self.normal;
        self.w = -self.w;
    }

    /// Signed distance; positive on the side the normal points to.
    pub fn signed_distance(&self, p: &Point3) -> f64 {
        self.normal.dot(&p.coords) - self.w
    }
}

/// A planar face: an ordered, closed loop of at least three points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point3>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point3>) -> Self {
        Self { vertices }
    }

    pub fn from_coords(coords: &[[f64; 3]]) -> Self {
        Self {
            vertices: coords.iter().map(|c| Point3::new(c[0], c[1], c[2])).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.vertices
            .iter()
            .all(|v| v.x.is_finite() && v.y.is_finite() && v.z.is_finite())
    }

    pub fn flip(&mut self) {
        self.vertices.reverse();
    }

    pub fn plane(&self) -> Option<Plane> {
        Plane::from_vertices(&self.vertices)
    }

    /// Area-weighted normal; its length is twice the polygon area.
    pub fn area_normal(&self) -> Vector3 {
        newell_normal(&self.vertices)
    }
}

fn newell_normal(vertices: &[Point3]) -> Vector3 {
    let mut normal = Vector3::zeros();
    for (i, current) in vertices.iter().enumerate() {
        let next = &vertices[(i + 1) % vertices.len()];
        normal.x += (current.y - next.y) * (current.z + next.z);
        normal.y += (current.z - next.z) * (current.x + next.x);
        normal.z += (current.x - next.x) * (current.y + next.y);
    }
    normal
}
