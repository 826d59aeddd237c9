use serde::{Deserialize, Serialize};

/// Closed 2D contour in the XY plane, stored counter-clockwise.
///
/// Outlines only exist to be extruded; scripts cannot pass one to the mesh
/// encoder directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    points: Vec<[f64; 2]>,
}

impl Outline {
    /// Builds an outline, dropping a repeated closing point and fixing the
    /// winding. Returns `None` for fewer than three points, non-finite input
    /// or zero area.
    pub fn new(mut points: Vec<[f64; 2]>) -> Option<Self> {
        if points.len() > 3 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 || points.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
            return None;
        }
        let area = signed_area(&points);
        if area.abs() < 1e-12 {
            return None;
        }
        if area < 0.0 {
            points.reverse();
        }
        Some(Self { points })
    }

    pub fn points(&self) -> &[[f64; 2]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn area(&self) -> f64 {
        signed_area(&self.points)
    }

    pub fn is_convex(&self) -> bool {
        let n = self.points.len();
        (0..n).all(|i| {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            let c = self.points[(i + 2) % n];
            cross(a, b, c) >= -1e-12
        })
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        self.map(|[x, y]| [x + dx, y + dy])
    }

    pub fn rotate(&self, angle: f64) -> Self {
        let (s, c) = angle.sin_cos();
        self.map(|[x, y]| [x * c - y * s, x * s + y * c])
    }

    /// Mirroring scales flip the winding, which `new` repairs.
    pub fn scale(&self, sx: f64, sy: f64) -> Option<Self> {
        Self::new(self.points.iter().map(|[x, y]| [x * sx, y * sy]).collect())
    }

    pub fn bounds(&self) -> ([f64; 2], [f64; 2]) {
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for p in &self.points {
            for axis in 0..2 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        (min, max)
    }

    fn map(&self, f: impl Fn([f64; 2]) -> [f64; 2]) -> Self {
        Self {
            points: self.points.iter().map(|p| f(*p)).collect(),
        }
    }
}

fn signed_area(points: &[[f64; 2]]) -> f64 {
    let n = points.len();
    let mut twice = 0.0;
    for i in 0..n {
        let [x0, y0] = points[i];
        let [x1, y1] = points[(i + 1) % n];
        twice += x0 * y1 - x1 * y0;
    }
    twice / 2.0
}

fn cross(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0])
}
