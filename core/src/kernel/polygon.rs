//! Polygon-soup implementation of the geometry kernel.

use super::{ExtrudeParams, GeometryKernel, KernelOpError, KernelResult, RevolveParams};
use crate::geometry::{csg, extrude, hull, Outline, Solid};
use tracing::trace;

/// BSP-tree CSG kernel over [`Solid`] polygon lists.
#[derive(Debug, Clone, Default)]
pub struct PolygonKernel;

impl PolygonKernel {
    pub fn new() -> Self {
        Self
    }
}

fn check_result(op: &str, solid: Solid) -> KernelResult<Solid> {
    if !solid.is_finite() {
        return Err(KernelOpError::OperationFailed(format!(
            "{} produced non-finite coordinates",
            op
        )));
    }
    trace!(op, polygons = solid.polygon_count(), "kernel op");
    Ok(solid)
}

impl GeometryKernel for PolygonKernel {
    fn name(&self) -> &'static str {
        "polygon-bsp"
    }

    fn union(&self, a: &Solid, b: &Solid) -> KernelResult<Solid> {
        check_result("union", csg::union(a, b)?)
    }

    fn subtract(&self, a: &Solid, b: &Solid) -> KernelResult<Solid> {
        check_result("subtract", csg::subtract(a, b)?)
    }

    fn intersect(&self, a: &Solid, b: &Solid) -> KernelResult<Solid> {
        check_result("intersect", csg::intersect(a, b)?)
    }

    fn hull(&self, solids: &[&Solid]) -> KernelResult<Solid> {
        check_result("hull", hull::hull_of(solids)?)
    }

    fn extrude_linear(&self, outline: &Outline, params: &ExtrudeParams) -> KernelResult<Solid> {
        check_result("extrudeLinear", extrude::extrude_linear(outline, params.height)?)
    }

    fn extrude_rotate(&self, outline: &Outline, params: &RevolveParams) -> KernelResult<Solid> {
        check_result(
            "extrudeRotate",
            extrude::extrude_rotate(outline, params.angle, params.segments)?,
        )
    }
}
