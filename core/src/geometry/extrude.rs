//! Sweeps of 2D outlines into solids.

use super::{Outline, Point3, Polygon, Solid};
use crate::kernel::{KernelOpError, KernelResult};
use std::f64::consts::TAU;

/// Splits an outline into CCW cap pieces: the outline itself when convex,
/// otherwise ear-clipped triangles.
fn cap_pieces(outline: &Outline) -> KernelResult<Vec<Vec<[f64; 2]>>> {
    if outline.is_convex() {
        return Ok(vec![outline.points().to_vec()]);
    }
    let data: Vec<f64> = outline.points().iter().flat_map(|p| [p[0], p[1]]).collect();
    let indices = earcutr::earcut(&data, &[], 2).map_err(|e| {
        KernelOpError::OperationFailed(format!("cap triangulation failed: {:?}", e))
    })?;
    if indices.len() < 3 {
        return Err(KernelOpError::OperationFailed(
            "cap triangulation produced no triangles".into(),
        ));
    }
    let points = outline.points();
    Ok(indices
        .chunks_exact(3)
        .map(|tri| {
            let (a, b, c) = (points[tri[0]], points[tri[1]], points[tri[2]]);
            let area = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
            if area < 0.0 {
                vec![a, c, b]
            } else {
                vec![a, b, c]
            }
        })
        .collect())
}

/// Extrudes along +Z from `z = 0` to `z = height`.
pub fn extrude_linear(outline: &Outline, height: f64) -> KernelResult<Solid> {
    if !height.is_finite() || height <= 0.0 {
        return Err(KernelOpError::InvalidGeometry(format!(
            "height must be a positive finite number, got {}",
            height
        )));
    }
    let points = outline.points();
    let n = points.len();
    let at = |p: [f64; 2], z: f64| Point3::new(p[0], p[1], z);

    let mut polygons = Vec::with_capacity(n + 2);
    for i in 0..n {
        let j = (i + 1) % n;
        polygons.push(Polygon::new(vec![
            at(points[i], 0.0),
            at(points[j], 0.0),
            at(points[j], height),
            at(points[i], height),
        ]));
    }
    for piece in cap_pieces(outline)? {
        polygons.push(Polygon::new(piece.iter().map(|p| at(*p, height)).collect()));
        polygons.push(Polygon::new(piece.iter().rev().map(|p| at(*p, 0.0)).collect()));
    }
    Ok(Solid::from_polygons(polygons))
}

/// Revolves an outline drawn in the XZ half-plane (x ≥ 0) around the Z
/// axis. Outline `x` is the radius and `y` the height.
pub fn extrude_rotate(outline: &Outline, angle: f64, segments: usize) -> KernelResult<Solid> {
    if !angle.is_finite() || angle <= 0.0 {
        return Err(KernelOpError::InvalidGeometry(format!(
            "angle must be a positive finite number, got {}",
            angle
        )));
    }
    if segments < 3 {
        return Err(KernelOpError::InvalidGeometry(format!(
            "segments must be at least 3, got {}",
            segments
        )));
    }
    if outline.points().iter().any(|p| p[0] < 0.0) {
        return Err(KernelOpError::InvalidGeometry(
            "rotational extrusion needs a profile with x >= 0".into(),
        ));
    }

    let full = angle >= TAU - 1e-9;
    let angle = angle.min(TAU);
    let points = outline.points();
    let n = points.len();
    let at = |p: [f64; 2], step: usize| {
        let theta = if full && step == segments {
            0.0
        } else {
            angle * step as f64 / segments as f64
        };
        Point3::new(p[0] * theta.cos(), p[0] * theta.sin(), p[1])
    };

    let mut polygons = Vec::with_capacity(n * segments + 2);
    for step in 0..segments {
        for i in 0..n {
            let j = (i + 1) % n;
            let mut quad = vec![
                at(points[i], step),
                at(points[i], step + 1),
                at(points[j], step + 1),
                at(points[j], step),
            ];
            // Vertices on the axis collapse.
            quad.dedup_by(|a, b| (*a - *b).norm() < 1e-12);
            if quad.len() > 3 && (quad[0] - quad[quad.len() - 1]).norm() < 1e-12 {
                quad.pop();
            }
            if quad.len() >= 3 {
                polygons.push(Polygon::new(quad));
            }
        }
    }
    if !full {
        for piece in cap_pieces(outline)? {
            polygons.push(Polygon::new(piece.iter().map(|p| at(*p, 0)).collect()));
            polygons.push(Polygon::new(piece.iter().rev().map(|p| at(*p, segments)).collect()));
        }
    }
    Ok(Solid::from_polygons(polygons))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::shapes;
    use std::f64::consts::PI;

    fn ell() -> Outline {
        Outline::new(vec![
            [0.0, 0.0],
            [2.0, 0.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 2.0],
            [0.0, 2.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_extrude_square() {
        let square = shapes::rectangle(2.0, 2.0, [0.0, 0.0]).unwrap();
        let solid = extrude_linear(&square, 3.0).unwrap();
        assert_eq!(solid.polygon_count(), 6);
        assert!((solid.signed_volume() - 12.0).abs() < 1e-9);
        assert!(solid.bounds().min.z.abs() < 1e-12);
    }

    #[test]
    fn test_extrude_concave_outline_uses_triangulated_caps() {
        let solid = extrude_linear(&ell(), 1.0).unwrap();
        assert!((solid.signed_volume() - 3.0).abs() < 1e-9);
        assert!(solid.polygons().iter().skip(6).all(|p| p.len() == 3));
    }

    #[test]
    fn test_extrude_rejects_zero_height() {
        let square = shapes::rectangle(1.0, 1.0, [0.0, 0.0]).unwrap();
        assert!(extrude_linear(&square, 0.0).is_err());
    }

    #[test]
    fn test_revolve_rectangle_is_a_tube() {
        // Ring with inner radius 1, outer radius 2, height 1.
        let profile = shapes::rectangle(1.0, 1.0, [1.5, 0.5]).unwrap();
        let tube = extrude_rotate(&profile, TAU, 64).unwrap();
        let exact = PI * (4.0 - 1.0);
        assert!(tube.signed_volume() > 0.0);
        assert!((tube.signed_volume() - exact).abs() / exact < 0.01);
    }

    #[test]
    fn test_half_revolution_has_caps() {
        let profile = shapes::rectangle(1.0, 1.0, [1.5, 0.5]).unwrap();
        let half = extrude_rotate(&profile, PI, 32).unwrap();
        assert_eq!(half.polygon_count(), 4 * 32 + 2);
        assert!(half.signed_volume() > 0.0);
    }

    #[test]
    fn test_revolve_profile_touching_axis() {
        let cone = Outline::new(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]).unwrap();
        let solid = extrude_rotate(&cone, TAU, 32).unwrap();
        assert!(solid.polygons().iter().all(|p| p.len() >= 3));
        assert!(solid.signed_volume() > 0.0);
    }

    #[test]
    fn test_revolve_rejects_negative_radius() {
        let profile = shapes::rectangle(1.0, 1.0, [0.0, 0.0]).unwrap();
        assert!(extrude_rotate(&profile, TAU, 16).is_err());
    }
}
