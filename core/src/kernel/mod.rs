//! Kernel abstraction layer for solid geometry operations.
//!
//! This module provides a trait-based abstraction over the combinators a
//! modeling script can reach, so the capability layer and the solid reducer
//! never depend on a concrete kernel.

pub mod types;
mod polygon;

#[cfg(test)]
mod tests_boolean;

pub use polygon::PolygonKernel;
pub use types::*;

use crate::geometry::{Outline, Solid};
use thiserror::Error;

/// Errors that can occur during kernel operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelOpError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelOpError>;

/// Abstract interface for kernel geometry operations.
///
/// Primitive constructors and rigid transforms are plain functions on
/// [`Solid`]; everything that needs a real algorithm goes through here.
pub trait GeometryKernel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    // === Boolean Operations ===

    /// Compute the union of two solids (A ∪ B).
    fn union(&self, a: &Solid, b: &Solid) -> KernelResult<Solid>;

    /// Compute the difference of two solids (A - B).
    fn subtract(&self, a: &Solid, b: &Solid) -> KernelResult<Solid>;

    /// Compute the intersection of two solids (A ∩ B).
    fn intersect(&self, a: &Solid, b: &Solid) -> KernelResult<Solid>;

    // === Hulls and Sweeps ===

    /// Convex hull of every vertex of every input.
    fn hull(&self, solids: &[&Solid]) -> KernelResult<Solid>;

    /// Extrude a 2D outline along +Z.
    fn extrude_linear(&self, outline: &Outline, params: &ExtrudeParams) -> KernelResult<Solid>;

    /// Revolve a 2D profile around Z.
    fn extrude_rotate(&self, outline: &Outline, params: &RevolveParams) -> KernelResult<Solid>;

    /// Left fold of [`GeometryKernel::union`].
    fn union_all(&self, solids: &[&Solid]) -> KernelResult<Solid> {
        let (first, rest) = solids
            .split_first()
            .ok_or_else(|| KernelOpError::InvalidGeometry("union of nothing".into()))?;
        rest.iter()
            .try_fold((*first).clone(), |acc, next| self.union(&acc, next))
    }

    /// Union of the hulls of each consecutive pair.
    fn hull_chain(&self, solids: &[&Solid]) -> KernelResult<Solid> {
        if solids.len() < 2 {
            return Err(KernelOpError::InvalidGeometry(
                "hullChain needs at least 2 solids".into(),
            ));
        }
        let links = solids
            .windows(2)
            .map(|pair| self.hull(pair))
            .collect::<KernelResult<Vec<_>>>()?;
        let refs: Vec<&Solid> = links.iter().collect();
        self.union_all(&refs)
    }
}

/// Get the default kernel implementation.
pub fn default_kernel() -> PolygonKernel {
    PolygonKernel::new()
}
