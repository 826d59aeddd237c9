use super::csg::{intersect, subtract, union};
use super::shapes::{cube, cuboid, cylinder};
use super::*;

fn unit_cube_at(x: f64, y: f64, z: f64) -> Solid {
    cube(2.0, Point3::new(x, y, z)).unwrap()
}

#[test]
fn test_union_of_overlapping_cubes_volume() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(1.0, 0.0, 0.0);
    let u = union(&a, &b).unwrap();
    // Two 8-unit cubes overlapping in a 1x2x2 slab.
    assert!((u.signed_volume() - 12.0).abs() < 1e-6, "volume {}", u.signed_volume());
}

#[test]
fn test_union_of_disjoint_cubes_keeps_all_faces() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(10.0, 0.0, 0.0);
    let u = union(&a, &b).unwrap();
    assert_eq!(u.polygon_count(), 12);
    assert!((u.signed_volume() - 16.0).abs() < 1e-9);
}

#[test]
fn test_subtract_corner() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(1.0, 1.0, 1.0);
    let d = subtract(&a, &b).unwrap();
    assert!((d.signed_volume() - 7.0).abs() < 1e-6, "volume {}", d.signed_volume());
}

#[test]
fn test_subtract_disjoint_returns_original() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(5.0, 5.0, 5.0);
    let d = subtract(&a, &b).unwrap();
    assert_eq!(d, a);
}

#[test]
fn test_drilled_hole() {
    let block = cuboid(Vector3::new(4.0, 4.0, 2.0), Point3::origin()).unwrap();
    let drill = cylinder(1.0, 4.0, 16, Point3::origin()).unwrap();
    let drilled = subtract(&block, &drill).unwrap();

    let hole_area = 16.0 * (std::f64::consts::TAU / 16.0).sin() / 2.0;
    let expected = 32.0 - hole_area * 2.0;
    assert!((drilled.signed_volume() - expected).abs() < 1e-6);
    assert!(drilled.is_finite());
}

#[test]
fn test_intersect_overlap() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(1.0, 1.0, 0.0);
    let i = intersect(&a, &b).unwrap();
    assert!((i.signed_volume() - 2.0).abs() < 1e-6, "volume {}", i.signed_volume());
}

#[test]
fn test_intersect_disjoint_is_empty() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(9.0, 0.0, 0.0);
    assert!(intersect(&a, &b).unwrap().is_empty());
}

#[test]
fn test_non_finite_operand_rejected() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let bad = Solid::from_polygons(vec![Polygon::from_coords(&[
        [0.0, 0.0, 0.0],
        [f64::NAN, 0.0, 0.0],
        [0.0, 1.0, 0.0],
    ])]);
    assert!(union(&a, &bad).is_err());
}

#[test]
fn test_union_output_has_no_degenerate_polygons() {
    let a = unit_cube_at(0.0, 0.0, 0.0);
    let b = unit_cube_at(0.5, 0.5, 0.5);
    let u = union(&a, &b).unwrap();
    assert!(u.polygons().iter().all(|p| p.len() >= 3));
}
