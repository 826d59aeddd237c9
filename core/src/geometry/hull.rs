//! Incremental 3D convex hull.

use super::{Point3, Polygon, Solid, Vector3};
use crate::kernel::{KernelOpError, KernelResult};
use std::collections::HashSet;

struct Face {
    v: [usize; 3],
    normal: Vector3,
    offset: f64,
    alive: bool,
}

impl Face {
    fn new(points: &[Point3], v: [usize; 3]) -> Self {
        let normal = (points[v[1]] - points[v[0]])
            .cross(&(points[v[2]] - points[v[0]]))
            .normalize();
        Self {
            v,
            offset: normal.dot(&points[v[0]].coords),
            normal,
            alive: true,
        }
    }

    fn distance(&self, p: &Point3) -> f64 {
        self.normal.dot(&p.coords) - self.offset
    }
}

fn degenerate() -> KernelOpError {
    KernelOpError::InvalidGeometry(
        "hull needs at least 4 points that are not coplanar".into(),
    )
}

fn farthest_by(points: &[Point3], key: impl Fn(&Point3) -> f64) -> (usize, f64) {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| (i, key(p)))
        .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
}

/// Convex hull of a point cloud as a triangulated solid.
pub fn convex_hull(points: &[Point3]) -> KernelResult<Solid> {
    if points.len() < 4 {
        return Err(degenerate());
    }
    if points.iter().any(|p| p.coords.iter().any(|c| !c.is_finite())) {
        return Err(KernelOpError::InvalidGeometry("hull input contains non-finite points".into()));
    }

    let scale = points
        .iter()
        .flat_map(|p| p.coords.iter().map(|c| c.abs()))
        .fold(1.0_f64, f64::max);
    let eps = 1e-10 * scale;

    let (i0, _) = farthest_by(points, |p| -p.x);
    let (i1, d1) = farthest_by(points, |p| (p - points[i0]).norm());
    if d1 <= eps {
        return Err(degenerate());
    }
    let axis = (points[i1] - points[i0]).normalize();
    let (i2, d2) = farthest_by(points, |p| {
        let d = p - points[i0];
        (d - axis * d.dot(&axis)).norm()
    });
    if d2 <= eps {
        return Err(degenerate());
    }
    let base_normal = (points[i1] - points[i0])
        .cross(&(points[i2] - points[i0]))
        .normalize();
    let (i3, d3) = farthest_by(points, |p| base_normal.dot(&(p - points[i0])).abs());
    if d3 <= eps {
        return Err(degenerate());
    }

    let interior = Point3::from(
        (points[i0].coords + points[i1].coords + points[i2].coords + points[i3].coords) / 4.0,
    );
    let mut faces: Vec<Face> = Vec::new();
    for tri in [[i0, i1, i2], [i0, i3, i1], [i0, i2, i3], [i1, i3, i2]] {
        let mut face = Face::new(points, tri);
        if face.distance(&interior) > 0.0 {
            face = Face::new(points, [tri[0], tri[2], tri[1]]);
        }
        faces.push(face);
    }

    let seeds = [i0, i1, i2, i3];
    for (p, point) in points.iter().enumerate() {
        if seeds.contains(&p) {
            continue;
        }
        let visible: Vec<usize> = faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.alive && f.distance(point) > eps)
            .map(|(i, _)| i)
            .collect();
        if visible.is_empty() {
            continue;
        }

        let mut edges = HashSet::new();
        for &f in &visible {
            let v = faces[f].v;
            for k in 0..3 {
                edges.insert((v[k], v[(k + 1) % 3]));
            }
            faces[f].alive = false;
        }
        let horizon: Vec<(usize, usize)> = edges
            .iter()
            .filter(|(a, b)| !edges.contains(&(*b, *a)))
            .copied()
            .collect();
        for (a, b) in horizon {
            faces.push(Face::new(points, [a, b, p]));
        }
    }

    let polygons = faces
        .iter()
        .filter(|f| f.alive)
        .map(|f| Polygon::new(f.v.iter().map(|&i| points[i]).collect()))
        .collect();
    Ok(Solid::from_polygons(polygons))
}

/// Hull of every vertex of every input solid.
pub fn hull_of(solids: &[&Solid]) -> KernelResult<Solid> {
    let points: Vec<Point3> = solids.iter().flat_map(|s| s.vertices().copied()).collect();
    convex_hull(&points)
}
