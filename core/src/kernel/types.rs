//! Parameter types for kernel sweep operations.

use serde::{Deserialize, Serialize};

/// Parameters for linear extrusion along +Z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtrudeParams {
    /// Extrusion distance (height).
    pub height: f64,
}

impl Default for ExtrudeParams {
    fn default() -> Self {
        Self { height: 1.0 }
    }
}

impl ExtrudeParams {
    pub fn linear(height: f64) -> Self {
        Self { height }
    }
}

/// Parameters for rotational extrusion around Z.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RevolveParams {
    /// Angle of revolution in radians.
    pub angle: f64,
    /// Number of steps the sweep is divided into.
    pub segments: usize,
}

impl Default for RevolveParams {
    fn default() -> Self {
        Self {
            angle: std::f64::consts::TAU, // Full 360°
            segments: 12,
        }
    }
}

impl RevolveParams {
    pub fn full(segments: usize) -> Self {
        Self {
            segments,
            ..Default::default()
        }
    }

    pub fn partial(angle: f64, segments: usize) -> Self {
        Self { angle, segments }
    }
}
