// Kernel-level checks of the boolean, hull and sweep entry points.

use super::*;
use crate::geometry::{shapes, Point3, Vector3};

fn cube_at(x: f64) -> Solid {
    shapes::cube(10.0, Point3::new(x, 0.0, 0.0)).unwrap()
}

#[test]
fn test_boolean_cube_cylinder() {
    let kernel = PolygonKernel::new();
    let cube = shapes::cuboid(Vector3::new(10.0, 10.0, 10.0), Point3::new(5.0, 5.0, 5.0)).unwrap();
    let cylinder = shapes::cylinder(1.5, 14.0, 24, Point3::new(5.0, 5.0, 5.0)).unwrap();

    let and_result = kernel.intersect(&cube, &cylinder).unwrap();
    assert!(!and_result.is_empty(), "AND operation should produce geometry");

    let or_result = kernel.union(&cube, &cylinder).unwrap();
    assert!(or_result.signed_volume() > cube.signed_volume());

    let diff = kernel.subtract(&cube, &cylinder).unwrap();
    let sum = diff.signed_volume() + and_result.signed_volume();
    assert!((sum - 1000.0).abs() < 1e-6, "A-B plus A&B should equal A, got {}", sum);
}

#[test]
fn test_union_all_folds_left() {
    let kernel = PolygonKernel::new();
    let (a, b, c) = (cube_at(0.0), cube_at(5.0), cube_at(10.0));
    let all = kernel.union_all(&[&a, &b, &c]).unwrap();
    assert!((all.signed_volume() - 2000.0).abs() < 1e-6);
}

#[test]
fn test_union_all_of_nothing_fails() {
    let kernel = PolygonKernel::new();
    assert!(matches!(
        kernel.union_all(&[]),
        Err(KernelOpError::InvalidGeometry(_))
    ));
}

#[test]
fn test_hull_chain_links_pairs() {
    let kernel = PolygonKernel::new();
    let a = shapes::sphere(1.0, 12, Point3::new(0.0, 0.0, 0.0)).unwrap();
    let b = shapes::sphere(1.0, 12, Point3::new(5.0, 0.0, 0.0)).unwrap();
    let c = shapes::sphere(1.0, 12, Point3::new(5.0, 5.0, 0.0)).unwrap();
    let chain = kernel.hull_chain(&[&a, &b, &c]).unwrap();
    let size = chain.bounds().size();
    assert!((size.x - 7.0).abs() < 1e-6);
    assert!((size.y - 7.0).abs() < 1e-6);
    assert!(kernel.hull_chain(&[&a]).is_err());
}

#[test]
fn test_sweeps_through_trait_object() {
    let kernel: &dyn GeometryKernel = &PolygonKernel::new();
    let square = shapes::rectangle(2.0, 2.0, [3.0, 0.0]).unwrap();
    let prism = kernel.extrude_linear(&square, &ExtrudeParams::linear(4.0)).unwrap();
    assert!((prism.signed_volume() - 16.0).abs() < 1e-9);

    let ring = kernel.extrude_rotate(&square, &RevolveParams::full(48)).unwrap();
    assert!(ring.signed_volume() > 0.0);
    assert!(kernel
        .extrude_linear(&square, &ExtrudeParams::linear(-1.0))
        .is_err());
}
