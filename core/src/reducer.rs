//! Reduces whatever `main` returned to exactly one solid.

use crate::executor::{CollectionItem, SolidOrCollection};
use crate::geometry::Solid;
use crate::kernel::GeometryKernel;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReductionError {
    #[error("main() returned empty array")]
    EmptyCollection,

    #[error("main() returned no 3D geometry ({skipped} non-geometry entries)")]
    NoGeometry { skipped: usize },
}

/// One solid from a solid or a collection.
///
/// Non-geometry entries are dropped. Several solids are unioned; if the union
/// fails the first solid is used instead and a warning is logged.
pub fn reduce(
    value: SolidOrCollection,
    kernel: &dyn GeometryKernel,
) -> Result<Solid, ReductionError> {
    let items = match value {
        SolidOrCollection::Solid(solid) => return Ok(solid),
        SolidOrCollection::Collection(items) => items,
    };
    if items.is_empty() {
        return Err(ReductionError::EmptyCollection);
    }

    let total = items.len();
    let mut solids: Vec<Solid> = items
        .into_iter()
        .filter_map(|item| match item {
            CollectionItem::Solid(solid) => Some(solid),
            CollectionItem::Other(_) => None,
        })
        .collect();
    let skipped = total - solids.len();
    if skipped > 0 {
        debug!(skipped, "dropped non-geometry entries");
    }

    match solids.len() {
        0 => Err(ReductionError::NoGeometry { skipped }),
        1 => Ok(solids.remove(0)),
        count => {
            let refs: Vec<&Solid> = solids.iter().collect();
            match kernel.union_all(&refs) {
                Ok(merged) => Ok(merged),
                Err(e) => {
                    warn!(error = %e, count, "union of returned solids failed, using the first");
                    Ok(solids.swap_remove(0))
                }
            }
        }
    }
}
