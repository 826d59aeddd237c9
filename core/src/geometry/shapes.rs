//! Primitive constructors.
//!
//! Every constructor validates its parameters and returns a closed solid whose
//! faces wind counter-clockwise when seen from outside.

use super::{hull, Outline, Point3, Polygon, Solid, Vector3};
use crate::kernel::{KernelOpError, KernelResult};
use std::f64::consts::{PI, TAU};

fn require_positive(name: &str, value: f64) -> KernelResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(KernelOpError::InvalidGeometry(format!(
            "{} must be a positive finite number, got {}",
            name, value
        )))
    }
}

fn require_segments(segments: usize) -> KernelResult<()> {
    if segments < 3 {
        return Err(KernelOpError::InvalidGeometry(format!(
            "segments must be at least 3, got {}",
            segments
        )));
    }
    Ok(())
}

fn require_finite_point(name: &str, p: &Point3) -> KernelResult<()> {
    if p.coords.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(KernelOpError::InvalidGeometry(format!("{} must be finite", name)))
    }
}

/// Axis-aligned box.
pub fn cuboid(size: Vector3, center: Point3) -> KernelResult<Solid> {
    require_positive("size[0]", size.x)?;
    require_positive("size[1]", size.y)?;
    require_positive("size[2]", size.z)?;
    require_finite_point("center", &center)?;

    // Corner i has bit 0 = +x, bit 1 = +y, bit 2 = +z.
    const FACES: [[usize; 4]; 6] = [
        [0, 4, 6, 2],
        [1, 3, 7, 5],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 2, 3, 1],
        [4, 5, 7, 6],
    ];
    let half = size / 2.0;
    let corner = |i: usize| {
        let sign = |bit: usize| if i & bit != 0 { 1.0 } else { -1.0 };
        Point3::new(
            center.x + sign(1) * half.x,
            center.y + sign(2) * half.y,
            center.z + sign(4) * half.z,
        )
    };
    let polygons = FACES
        .iter()
        .map(|face| Polygon::new(face.iter().map(|&i| corner(i)).collect()))
        .collect();
    Ok(Solid::from_polygons(polygons))
}

pub fn cube(size: f64, center: Point3) -> KernelResult<Solid> {
    cuboid(Vector3::new(size, size, size), center)
}

/// UV sphere; `segments` is the number of slices around Z.
pub fn sphere(radius: f64, segments: usize, center: Point3) -> KernelResult<Solid> {
    require_positive("radius", radius)?;
    require_segments(segments)?;
    require_finite_point("center", &center)?;

    let slices = segments;
    let stacks = (segments / 2).max(2);
    let point = |stack: usize, slice: usize| {
        let theta = PI * stack as f64 / stacks as f64;
        let phi = TAU * (slice % slices) as f64 / slices as f64;
        center
            + radius
                * Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos())
    };

    let mut polygons = Vec::with_capacity(slices * stacks);
    for stack in 0..stacks {
        for slice in 0..slices {
            let a = point(stack, slice);
            let b = point(stack + 1, slice);
            let c = point(stack + 1, slice + 1);
            let d = point(stack, slice + 1);
            let vertices = if stack == 0 {
                vec![a, b, c]
            } else if stack == stacks - 1 {
                vec![a, b, d]
            } else {
                vec![a, b, c, d]
            };
            polygons.push(Polygon::new(vertices));
        }
    }
    Ok(Solid::from_polygons(polygons))
}

/// Cylinder along Z, centered on `center`.
pub fn cylinder(radius: f64, height: f64, segments: usize, center: Point3) -> KernelResult<Solid> {
    frustum(radius, radius, height, segments, center)
}

/// Truncated cone along Z. One of the radii may be zero.
pub fn frustum(
    bottom_radius: f64,
    top_radius: f64,
    height: f64,
    segments: usize,
    center: Point3,
) -> KernelResult<Solid> {
    require_positive("height", height)?;
    require_segments(segments)?;
    require_finite_point("center", &center)?;
    for (name, r) in [("startRadius", bottom_radius), ("endRadius", top_radius)] {
        if !r.is_finite() || r < 0.0 {
            return Err(KernelOpError::InvalidGeometry(format!(
                "{} must be a non-negative finite number, got {}",
                name, r
            )));
        }
    }
    if bottom_radius == 0.0 && top_radius == 0.0 {
        return Err(KernelOpError::InvalidGeometry(
            "at least one radius must be positive".into(),
        ));
    }

    let z0 = center.z - height / 2.0;
    let z1 = center.z + height / 2.0;
    let ring = |r: f64, z: f64| -> Vec<Point3> {
        (0..segments)
            .map(|i| {
                let a = TAU * i as f64 / segments as f64;
                Point3::new(center.x + r * a.cos(), center.y + r * a.sin(), z)
            })
            .collect()
    };
    let bottom = ring(bottom_radius, z0);
    let top = ring(top_radius, z1);
    let bottom_apex = Point3::new(center.x, center.y, z0);
    let top_apex = Point3::new(center.x, center.y, z1);

    let mut polygons = Vec::with_capacity(segments + 2);
    for i in 0..segments {
        let j = (i + 1) % segments;
        let side = if bottom_radius == 0.0 {
            vec![bottom_apex, top[j], top[i]]
        } else if top_radius == 0.0 {
            vec![bottom[i], bottom[j], top_apex]
        } else {
            vec![bottom[i], bottom[j], top[j], top[i]]
        };
        polygons.push(Polygon::new(side));
    }
    if top_radius > 0.0 {
        polygons.push(Polygon::new(top));
    }
    if bottom_radius > 0.0 {
        let mut cap = bottom;
        cap.reverse();
        polygons.push(Polygon::new(cap));
    }
    Ok(Solid::from_polygons(polygons))
}

/// Ring torus around Z. `inner_radius` is the tube, `outer_radius` the ring.
pub fn torus(
    inner_radius: f64,
    outer_radius: f64,
    inner_segments: usize,
    outer_segments: usize,
    center: Point3,
) -> KernelResult<Solid> {
    require_positive("innerRadius", inner_radius)?;
    require_positive("outerRadius", outer_radius)?;
    require_segments(inner_segments)?;
    require_segments(outer_segments)?;
    require_finite_point("center", &center)?;
    if inner_radius >= outer_radius {
        return Err(KernelOpError::InvalidGeometry(format!(
            "innerRadius ({}) must be smaller than outerRadius ({})",
            inner_radius, outer_radius
        )));
    }

    let point = |i: usize, j: usize| {
        let u = TAU * (i % outer_segments) as f64 / outer_segments as f64;
        let v = TAU * (j % inner_segments) as f64 / inner_segments as f64;
        let r = outer_radius + inner_radius * v.cos();
        center + Vector3::new(r * u.cos(), r * u.sin(), inner_radius * v.sin())
    };

    let mut polygons = Vec::with_capacity(outer_segments * inner_segments);
    for i in 0..outer_segments {
        for j in 0..inner_segments {
            polygons.push(Polygon::new(vec![
                point(i, j),
                point(i + 1, j),
                point(i + 1, j + 1),
                point(i, j + 1),
            ]));
        }
    }
    Ok(Solid::from_polygons(polygons))
}

fn sphere_points(center: Point3, radius: f64, segments: usize) -> Vec<Point3> {
    let stacks = (segments / 2).max(2);
    let mut points = vec![center + Vector3::z() * radius, center - Vector3::z() * radius];
    for stack in 1..stacks {
        let theta = PI * stack as f64 / stacks as f64;
        for slice in 0..segments {
            let phi = TAU * slice as f64 / segments as f64;
            points.push(
                center
                    + radius
                        * Vector3::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos()),
            );
        }
    }
    points
}

/// Box with every edge and corner rounded by `round_radius`.
pub fn rounded_cuboid(
    size: Vector3,
    round_radius: f64,
    segments: usize,
    center: Point3,
) -> KernelResult<Solid> {
    require_positive("roundRadius", round_radius)?;
    require_segments(segments)?;
    if size.iter().any(|s| !(2.0 * round_radius < *s)) {
        return Err(KernelOpError::InvalidGeometry(format!(
            "roundRadius ({}) must be less than half of every size component",
            round_radius
        )));
    }
    require_finite_point("center", &center)?;

    let inset = size / 2.0 - Vector3::repeat(round_radius);
    let mut points = Vec::new();
    for corner in 0..8 {
        let sign = |bit: usize| if corner & bit != 0 { 1.0 } else { -1.0 };
        let c = center + Vector3::new(sign(1) * inset.x, sign(2) * inset.y, sign(4) * inset.z);
        points.extend(sphere_points(c, round_radius, segments));
    }
    hull::convex_hull(&points)
}

/// Cylinder along Z whose top and bottom rims are rounded by `round_radius`.
pub fn rounded_cylinder(
    radius: f64,
    height: f64,
    round_radius: f64,
    segments: usize,
    center: Point3,
) -> KernelResult<Solid> {
    require_positive("radius", radius)?;
    require_positive("height", height)?;
    require_positive("roundRadius", round_radius)?;
    require_segments(segments)?;
    require_finite_point("center", &center)?;
    if round_radius >= radius || 2.0 * round_radius >= height {
        return Err(KernelOpError::InvalidGeometry(format!(
            "roundRadius ({}) must be less than radius and half the height",
            round_radius
        )));
    }

    let ring = radius - round_radius;
    let dz = height / 2.0 - round_radius;
    let tube_segments = (segments / 2).max(4);
    let mut points = Vec::with_capacity(2 * segments * tube_segments);
    for (z, lower) in [(dz, false), (-dz, true)] {
        for i in 0..segments {
            let u = TAU * i as f64 / segments as f64;
            for j in 0..=tube_segments {
                let mut v = PI / 2.0 * j as f64 / tube_segments as f64;
                if lower {
                    v = -v;
                }
                let r = ring + round_radius * v.cos();
                points.push(Point3::new(
                    center.x + r * u.cos(),
                    center.y + r * u.sin(),
                    center.z + z + round_radius * v.sin(),
                ));
            }
        }
    }
    hull::convex_hull(&points)
}

/// Solid from explicit vertex and face lists. Faces may be listed in either
/// winding; the result is reoriented to enclose positive volume.
pub fn polyhedron(points: &[Point3], faces: &[Vec<usize>]) -> KernelResult<Solid> {
    if points.len() < 4 || faces.len() < 4 {
        return Err(KernelOpError::InvalidGeometry(
            "polyhedron needs at least 4 points and 4 faces".into(),
        ));
    }
    for (i, p) in points.iter().enumerate() {
        require_finite_point(&format!("points[{}]", i), p)?;
    }
    let mut polygons = Vec::with_capacity(faces.len());
    for (f, face) in faces.iter().enumerate() {
        if face.len() < 3 {
            return Err(KernelOpError::InvalidGeometry(format!(
                "faces[{}] has fewer than 3 vertices",
                f
            )));
        }
        let mut vertices = Vec::with_capacity(face.len());
        for &index in face {
            let p = points.get(index).ok_or_else(|| {
                KernelOpError::InvalidGeometry(format!(
                    "faces[{}] references missing point {}",
                    f, index
                ))
            })?;
            vertices.push(*p);
        }
        polygons.push(Polygon::new(vertices));
    }
    let solid = Solid::from_polygons(polygons).reoriented();
    if solid.signed_volume().abs() < 1e-12 {
        return Err(KernelOpError::InvalidGeometry("polyhedron encloses no volume".into()));
    }
    Ok(solid)
}

pub fn rectangle(width: f64, depth: f64, center: [f64; 2]) -> KernelResult<Outline> {
    require_positive("size[0]", width)?;
    require_positive("size[1]", depth)?;
    let (hx, hy) = (width / 2.0, depth / 2.0);
    outline(vec![
        [center[0] - hx, center[1] - hy],
        [center[0] + hx, center[1] - hy],
        [center[0] + hx, center[1] + hy],
        [center[0] - hx, center[1] + hy],
    ])
}

pub fn circle(radius: f64, segments: usize, center: [f64; 2]) -> KernelResult<Outline> {
    require_positive("radius", radius)?;
    require_segments(segments)?;
    outline(
        (0..segments)
            .map(|i| {
                let a = TAU * i as f64 / segments as f64;
                [center[0] + radius * a.cos(), center[1] + radius * a.sin()]
            })
            .collect(),
    )
}

/// Arbitrary simple polygon in the XY plane.
pub fn outline(points: Vec<[f64; 2]>) -> KernelResult<Outline> {
    Outline::new(points).ok_or_else(|| {
        KernelOpError::InvalidGeometry(
            "polygon needs at least 3 finite points enclosing non-zero area".into(),
        )
    })
}
