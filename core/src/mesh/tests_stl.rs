use super::stl::encoded_len;
use super::*;
use crate::geometry::{shapes, Point3, Polygon, Solid, Vector3};
use proptest::prelude::*;

fn regular_polygon(sides: usize, radius: f64, z: f64) -> Polygon {
    let vertices = (0..sides)
        .map(|i| {
            let a = i as f64 / sides as f64 * std::f64::consts::TAU;
            Point3::new(radius * a.cos(), radius * a.sin(), z)
        })
        .collect();
    Polygon::new(vertices)
}

#[test]
fn test_cuboid_layout() {
    let solid = shapes::cuboid(Vector3::new(2.0, 3.0, 4.0), Point3::origin()).unwrap();
    let artifact = encode(&solid).unwrap();
    assert_eq!(artifact.len(), 80 + 4 + 12 * 50);
    assert_eq!(artifact.triangle_count(), 12);
    assert_eq!(artifact.triangles().count(), 12);
    assert!(!artifact.header().starts_with(b"solid"));
    assert!(artifact.header()[40..].iter().all(|b| *b == 0));
}

#[test]
fn test_records_round_trip() {
    let solid = shapes::cube(2.0, Point3::origin()).unwrap();
    let artifact = encode(&solid).unwrap();
    let expected: Vec<MeshTriangle> = triangulate(&solid).collect();
    let decoded: Vec<MeshTriangle> = artifact.triangles().collect();
    assert_eq!(decoded, expected);

    for t in &decoded {
        let n = t.normal;
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        assert!((len - 1.0).abs() < 1e-5);
    }
    // attribute bytes of the first record
    assert_eq!(&artifact.bytes()[84 + 48..84 + 50], &[0, 0]);
}

#[test]
fn test_outward_normals_on_cube() {
    let solid = shapes::cube(2.0, Point3::origin()).unwrap();
    for t in triangulate(&solid) {
        let centroid: [f32; 3] = [0, 1, 2].map(|axis| {
            (t.vertices[0][axis] + t.vertices[1][axis] + t.vertices[2][axis]) / 3.0
        });
        let dot: f32 = (0..3).map(|i| t.normal[i] * centroid[i]).sum();
        assert!(dot > 0.0, "inward normal {:?}", t.normal);
    }
}

#[test]
fn test_degenerate_triangle_has_zero_normal() {
    let polygon = Polygon::from_coords(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
    let solid = Solid::from_polygons(vec![polygon]);
    let artifact = encode(&solid).unwrap();
    let triangle = artifact.triangles().next().unwrap();
    assert!(triangle.is_degenerate());
}

#[test]
fn test_encoding_failures() {
    assert_eq!(encode(&Solid::empty()), Err(EncodingError::NoTriangles));

    let polygon = Polygon::from_coords(&[[0.0, 0.0, 0.0], [f64::NAN, 0.0, 0.0], [0.0, 1.0, 0.0]]);
    assert_eq!(
        encode(&Solid::from_polygons(vec![polygon])),
        Err(EncodingError::NonFinite)
    );
}

#[test]
fn test_coordinates_beyond_f32_range_are_rejected() {
    let huge = 1e39;
    let polygon = Polygon::from_coords(&[[0.0, 0.0, 0.0], [huge, 0.0, 0.0], [0.0, 1.0, 0.0]]);
    assert_eq!(
        encode(&Solid::from_polygons(vec![polygon])),
        Err(EncodingError::NonFinite)
    );

    let stretched = shapes::cuboid(Vector3::new(1e300, 1.0, 1.0), Point3::origin()).unwrap();
    assert_eq!(encode(&stretched), Err(EncodingError::NonFinite));
}

#[test]
fn test_largest_f32_coordinate_still_encodes() {
    let edge = f32::MAX as f64;
    let polygon = Polygon::from_coords(&[[0.0, 0.0, 0.0], [edge, 0.0, 0.0], [0.0, 1.0, 0.0]]);
    let artifact = encode(&Solid::from_polygons(vec![polygon])).unwrap();
    let triangle = artifact.triangles().next().unwrap();
    assert_eq!(triangle.vertices[1][0], f32::MAX);
    assert!(triangle
        .vertices
        .iter()
        .flatten()
        .chain(triangle.normal.iter())
        .all(|c| c.is_finite()));
}

#[test]
fn test_from_bytes_checks_length() {
    let artifact = encode(&shapes::cube(1.0, Point3::origin()).unwrap()).unwrap();
    let copy = BinaryArtifact::from_bytes(artifact.bytes().to_vec()).unwrap();
    assert_eq!(copy, artifact);

    let mut truncated = artifact.bytes().to_vec();
    truncated.pop();
    assert!(matches!(
        BinaryArtifact::from_bytes(truncated),
        Err(EncodingError::Malformed(_))
    ));
    assert!(BinaryArtifact::from_bytes(vec![0; 10]).is_err());
}

proptest! {
    #[test]
    fn fan_triangulation_count(sides in prop::collection::vec(3usize..16, 1..24)) {
        let polygons: Vec<Polygon> = sides
            .iter()
            .enumerate()
            .map(|(i, n)| regular_polygon(*n, 1.0 + i as f64, i as f64))
            .collect();
        let solid = Solid::from_polygons(polygons);
        let expected: usize = sides.iter().map(|n| n - 2).sum();

        let artifact = encode(&solid).unwrap();
        prop_assert_eq!(artifact.triangle_count() as usize, expected);
        prop_assert_eq!(artifact.len(), encoded_len(expected));
        prop_assert_eq!(artifact.triangles().count(), expected);
    }

    #[test]
    fn triangle_only_solids_keep_polygon_count(count in 1usize..64, radius in 0.1f64..100.0) {
        let polygons: Vec<Polygon> = (0..count)
            .map(|i| regular_polygon(3, radius, i as f64))
            .collect();
        let solid = Solid::from_polygons(polygons);
        let artifact = encode(&solid).unwrap();
        prop_assert_eq!(artifact.triangle_count() as usize, count);
    }
}
