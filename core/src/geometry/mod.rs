//! Polygon boundary-representation geometry.
//!
//! Everything a modeling script can build ends up as a [`Solid`]: an ordered
//! list of planar polygons wound counter-clockwise when seen from outside.

use nalgebra as na;

pub type Point3 = na::Point3<f64>;
pub type Vector3 = na::Vector3<f64>;
pub type Matrix3 = na::Matrix3<f64>;

pub const EPSILON: f64 = 1e-6;

pub trait ApproxEq {
    fn approx_eq(&self, other: &Self) -> bool;
}

impl ApproxEq for f64 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).abs() < EPSILON
    }
}

impl ApproxEq for Point3 {
    fn approx_eq(&self, other: &Self) -> bool {
        na::distance_squared(self, other) < EPSILON * EPSILON
    }
}

impl ApproxEq for Vector3 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).norm_squared() < EPSILON * EPSILON
    }
}

pub mod bounds;
pub use bounds::Aabb;

pub mod polygon;
pub use polygon::{Plane, Polygon};

pub mod solid;
pub use solid::Solid;

pub mod outline;
pub use outline::Outline;

pub mod shapes;

pub mod csg;
pub mod extrude;
pub mod hull;

#[cfg(test)]
mod tests_csg;
