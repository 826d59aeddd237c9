//! Constructive solid geometry on polygon soups using BSP trees.
//!
//! Trees live in an arena and every traversal is iterative, so deeply
//! unbalanced trees from adversarial input cannot overflow the stack.

use super::{Plane, Point3, Polygon, Solid};
use crate::kernel::{KernelOpError, KernelResult};

/// Classification tolerance for plane splits.
const SPLIT_EPSILON: f64 = 1e-5;

const COPLANAR: u8 = 0;
const FRONT: u8 = 1;
const BACK: u8 = 2;
const SPANNING: u8 = 3;

#[derive(Debug, Clone)]
struct Face {
    vertices: Vec<Point3>,
    plane: Plane,
}

impl Face {
    fn flip(&mut self) {
        self.vertices.reverse();
        self.plane.flip();
    }
}

#[derive(Debug, Default)]
struct Node {
    plane: Option<Plane>,
    front: Option<usize>,
    back: Option<usize>,
    faces: Vec<Face>,
}

/// Splits `face` by `plane`. Coplanar faces go to `coplanar_front` or
/// `coplanar_back` depending on their orientation.
fn split_face(
    plane: &Plane,
    face: Face,
    coplanar_front: &mut Vec<Face>,
    coplanar_back: &mut Vec<Face>,
    front: &mut Vec<Face>,
    back: &mut Vec<Face>,
) {
    let types: Vec<u8> = face
        .vertices
        .iter()
        .map(|v| {
            let t = plane.signed_distance(v);
            if t < -SPLIT_EPSILON {
                BACK
            } else if t > SPLIT_EPSILON {
                FRONT
            } else {
                COPLANAR
            }
        })
        .collect();
    let face_type = types.iter().fold(COPLANAR, |acc, t| acc | t);

    match face_type {
        COPLANAR => {
            if plane.normal.dot(&face.plane.normal) > 0.0 {
                coplanar_front.push(face);
            } else {
                coplanar_back.push(face);
            }
        }
        FRONT => front.push(face),
        BACK => back.push(face),
        _ => {
            let n = face.vertices.len();
            let mut f = Vec::with_capacity(n + 1);
            let mut b = Vec::with_capacity(n + 1);
            for i in 0..n {
                let j = (i + 1) % n;
                let (ti, tj) = (types[i], types[j]);
                let (vi, vj) = (face.vertices[i], face.vertices[j]);
                if ti != BACK {
                    f.push(vi);
                }
                if ti != FRONT {
                    b.push(vi);
                }
                if ti | tj == SPANNING {
                    let t = (plane.w - plane.normal.dot(&vi.coords))
                        / plane.normal.dot(&(vj - vi));
                    let v = vi + (vj - vi) * t;
                    f.push(v);
                    b.push(v);
                }
            }
            if f.len() >= 3 {
                front.push(Face {
                    vertices: f,
                    plane: face.plane,
                });
            }
            if b.len() >= 3 {
                back.push(Face {
                    vertices: b,
                    plane: face.plane,
                });
            }
        }
    }
}

struct BspTree {
    nodes: Vec<Node>,
}

impl BspTree {
    fn new(faces: Vec<Face>) -> Self {
        let mut tree = Self {
            nodes: vec![Node::default()],
        };
        tree.build(faces);
        tree
    }

    fn child(&mut self, parent: usize, front: bool) -> usize {
        let existing = if front {
            self.nodes[parent].front
        } else {
            self.nodes[parent].back
        };
        if let Some(idx) = existing {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node::default());
        if front {
            self.nodes[parent].front = Some(idx);
        } else {
            self.nodes[parent].back = Some(idx);
        }
        idx
    }

    fn build(&mut self, faces: Vec<Face>) {
        let mut stack = vec![(0usize, faces)];
        while let Some((idx, faces)) = stack.pop() {
            if faces.is_empty() {
                continue;
            }
            let plane = match self.nodes[idx].plane {
                Some(plane) => plane,
                None => {
                    let plane = faces[0].plane;
                    self.nodes[idx].plane = Some(plane);
                    plane
                }
            };
            let mut coplanar = Vec::new();
            let mut front = Vec::new();
            let mut back = Vec::new();
            for face in faces {
                let mut coplanar_back = Vec::new();
                split_face(&plane, face, &mut coplanar, &mut coplanar_back, &mut front, &mut back);
                coplanar.append(&mut coplanar_back);
            }
            self.nodes[idx].faces.append(&mut coplanar);
            if !front.is_empty() {
                let child = self.child(idx, true);
                stack.push((child, front));
            }
            if !back.is_empty() {
                let child = self.child(idx, false);
                stack.push((child, back));
            }
        }
    }

    /// Converts solid space to empty space and back.
    fn invert(&mut self) {
        for node in &mut self.nodes {
            for face in &mut node.faces {
                face.flip();
            }
            if let Some(plane) = node.plane.as_mut() {
                plane.flip();
            }
            std::mem::swap(&mut node.front, &mut node.back);
        }
    }

    /// Removes the parts of `faces` that lie inside this tree's solid.
    fn clip_faces(&self, faces: Vec<Face>) -> Vec<Face> {
        let mut kept = Vec::new();
        let mut stack = vec![(0usize, faces)];
        while let Some((idx, faces)) = stack.pop() {
            let node = &self.nodes[idx];
            let Some(plane) = node.plane else {
                kept.extend(faces);
                continue;
            };
            let mut front = Vec::new();
            let mut back = Vec::new();
            for face in faces {
                let mut coplanar_front = Vec::new();
                let mut coplanar_back = Vec::new();
                split_face(
                    &plane,
                    face,
                    &mut coplanar_front,
                    &mut coplanar_back,
                    &mut front,
                    &mut back,
                );
                front.append(&mut coplanar_front);
                back.append(&mut coplanar_back);
            }
            match node.front {
                Some(child) => stack.push((child, front)),
                None => kept.extend(front),
            }
            if let Some(child) = node.back {
                stack.push((child, back));
            }
        }
        kept
    }

    /// Removes every face of this tree that lies inside `other`.
    fn clip_to(&mut self, other: &BspTree) {
        for node in &mut self.nodes {
            let faces = std::mem::take(&mut node.faces);
            node.faces = other.clip_faces(faces);
        }
    }

    fn all_faces(&self) -> Vec<Face> {
        self.nodes.iter().flat_map(|n| n.faces.iter().cloned()).collect()
    }

    fn into_solid(self) -> Solid {
        Solid::from_polygons(
            self.nodes
                .into_iter()
                .flat_map(|n| n.faces)
                .filter(|f| f.vertices.len() >= 3)
                .map(|f| Polygon::new(f.vertices))
                .collect(),
        )
    }
}

fn to_faces(solid: &Solid) -> KernelResult<Vec<Face>> {
    if !solid.is_finite() {
        return Err(KernelOpError::InvalidGeometry(
            "solid contains non-finite coordinates".into(),
        ));
    }
    Ok(solid
        .polygons()
        .iter()
        .filter_map(|p| {
            p.plane().map(|plane| Face {
                vertices: p.vertices.clone(),
                plane,
            })
        })
        .collect())
}

fn disjoint(a: &Solid, b: &Solid) -> bool {
    !a.bounds().intersects(&b.bounds(), SPLIT_EPSILON)
}

/// A ∪ B.
pub fn union(a: &Solid, b: &Solid) -> KernelResult<Solid> {
    let (fa, fb) = (to_faces(a)?, to_faces(b)?);
    if fa.is_empty() || fb.is_empty() || disjoint(a, b) {
        let mut polygons = a.polygons().to_vec();
        polygons.extend_from_slice(b.polygons());
        return Ok(Solid::from_polygons(polygons));
    }
    let mut ta = BspTree::new(fa);
    let mut tb = BspTree::new(fb);
    ta.clip_to(&tb);
    tb.clip_to(&ta);
    tb.invert();
    tb.clip_to(&ta);
    tb.invert();
    ta.build(tb.all_faces());
    Ok(ta.into_solid())
}

/// A − B.
pub fn subtract(a: &Solid, b: &Solid) -> KernelResult<Solid> {
    let (fa, fb) = (to_faces(a)?, to_faces(b)?);
    if fa.is_empty() || fb.is_empty() || disjoint(a, b) {
        return Ok(a.clone());
    }
    let mut ta = BspTree::new(fa);
    let mut tb = BspTree::new(fb);
    ta.invert();
    ta.clip_to(&tb);
    tb.clip_to(&ta);
    tb.invert();
    tb.clip_to(&ta);
    tb.invert();
    ta.build(tb.all_faces());
    ta.invert();
    Ok(ta.into_solid())
}

/// A ∩ B.
pub fn intersect(a: &Solid, b: &Solid) -> KernelResult<Solid> {
    let (fa, fb) = (to_faces(a)?, to_faces(b)?);
    if fa.is_empty() || fb.is_empty() || disjoint(a, b) {
        return Ok(Solid::empty());
    }
    let mut ta = BspTree::new(fa);
    let mut tb = BspTree::new(fb);
    ta.invert();
    tb.clip_to(&ta);
    tb.invert();
    ta.clip_to(&tb);
    tb.clip_to(&ta);
    ta.build(tb.all_faces());
    ta.invert();
    Ok(ta.into_solid())
}
