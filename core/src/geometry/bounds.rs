use super::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.extend(p);
        }
        bounds
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&mut self, p: &Point3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);

        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        let mut res = *self;
        res.min.x = res.min.x.min(other.min.x);
        res.min.y = res.min.y.min(other.min.y);
        res.min.z = res.min.z.min(other.min.z);

        res.max.x = res.max.x.max(other.max.x);
        res.max.y = res.max.y.max(other.max.y);
        res.max.z = res.max.z.max(other.max.z);
        res
    }

    pub fn contains(&self, p: &Point3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Overlap test with a tolerance, so touching boxes count as overlapping.
    pub fn intersects(&self, other: &Aabb, tolerance: f64) -> bool {
        self.min.x <= other.max.x + tolerance && other.min.x <= self.max.x + tolerance &&
        self.min.y <= other.max.y + tolerance && other.min.y <= self.max.y + tolerance &&
        self.min.z <= other.max.z + tolerance && other.min.z <= self.max.z + tolerance
    }

    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn size(&self) -> Vector3 {
        self.max - self.min
    }
}
