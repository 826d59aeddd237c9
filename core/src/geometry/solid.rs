use super::{Aabb, Matrix3, Point3, Polygon, Vector3};
use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Boundary representation of a 3D shape as a list of planar polygons.
///
/// Scripts never build one directly; every `Solid` comes out of a kernel
/// constructor or combinator. Transforms consume `self` so a solid has a
/// single owner as it moves through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solid {
    polygons: Vec<Polygon>,
}

impl Solid {
    pub fn from_polygons(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn into_polygons(self) -> Vec<Polygon> {
        self.polygons
    }

    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Number of triangles a fan triangulation of every face yields.
    pub fn triangle_count(&self) -> usize {
        self.polygons
            .iter()
            .filter(|p| p.len() >= 3)
            .map(|p| p.len() - 2)
            .sum()
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Point3> {
        self.polygons.iter().flat_map(|p| p.vertices.iter())
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices())
    }

    pub fn is_finite(&self) -> bool {
        self.polygons.iter().all(Polygon::is_finite)
    }

    /// Enclosed volume, positive when faces wind outward.
    pub fn signed_volume(&self) -> f64 {
        let mut six_volume = 0.0;
        for polygon in &self.polygons {
            let v = &polygon.vertices;
            for i in 1..v.len().saturating_sub(1) {
                six_volume += v[0].coords.dot(&v[i].coords.cross(&v[i + 1].coords));
            }
        }
        six_volume / 6.0
    }

    pub fn flip(&mut self) {
        for polygon in &mut self.polygons {
            polygon.flip();
        }
    }

    /// Flips every face if the solid is wound inside-out.
    pub fn reoriented(mut self) -> Self {
        if self.signed_volume() < 0.0 {
            self.flip();
        }
        self
    }

    /// Applies `p' = linear * p + translation`. Mirroring transforms
    /// reverse the winding so faces keep pointing outward.
    pub fn transformed(mut self, linear: &Matrix3, translation: &Vector3) -> Self {
        for polygon in &mut self.polygons {
            for v in &mut polygon.vertices {
                *v = Point3::from(linear * v.coords + translation);
            }
        }
        if linear.determinant() < 0.0 {
            self.flip();
        }
        self
    }

    pub fn translate(self, offset: Vector3) -> Self {
        self.transformed(&Matrix3::identity(), &offset)
    }

    /// Rotates about X, then Y, then Z (angles in radians).
    pub fn rotate(self, angles: Vector3) -> Self {
        let rotation = na::Rotation3::from_euler_angles(angles.x, angles.y, angles.z);
        self.transformed(rotation.matrix(), &Vector3::zeros())
    }

    pub fn scale(self, factors: Vector3) -> Self {
        self.transformed(&Matrix3::from_diagonal(&factors), &Vector3::zeros())
    }

    /// Moves the bounding-box center onto `target` along the selected axes.
    pub fn center_on(self, target: Point3, axes: [bool; 3]) -> Self {
        let bounds = self.bounds();
        if bounds.is_empty() {
            return self;
        }
        let center = bounds.center();
        let mut offset = Vector3::zeros();
        for axis in 0..3 {
            if axes[axis] {
                offset[axis] = target[axis] - center[axis];
            }
        }
        self.translate(offset)
    }
}
