//! Geometry namespaces: `primitives`, `booleans`, `transforms`,
//! `extrusions` and `hulls`, called the way `@jscad/modeling` is.

use super::args::{self, Geometry};
use super::{Member, Namespace};
use crate::geometry::{shapes, Outline, Point3, Solid};
use crate::kernel::{ExtrudeParams, RevolveParams};
use crate::script::{Interpreter, ScriptError, ScriptResult, Value};
use std::f64::consts::TAU;
use std::rc::Rc;
use tracing::trace;

pub const PRIMITIVES: Namespace = Namespace {
    name: "primitives",
    members: &[
        Member::Function("cuboid", cuboid),
        Member::Function("cube", cube),
        Member::Function("sphere", sphere),
        Member::Function("cylinder", cylinder),
        Member::Function("roundedCuboid", rounded_cuboid),
        Member::Function("roundedCylinder", rounded_cylinder),
        Member::Function("torus", torus),
        Member::Function("polyhedron", polyhedron),
        Member::Function("rectangle", rectangle),
        Member::Function("square", square),
        Member::Function("circle", circle),
        Member::Function("polygon", polygon),
    ],
};

pub const BOOLEANS: Namespace = Namespace {
    name: "booleans",
    members: &[
        Member::Function("union", union),
        Member::Function("subtract", subtract),
        Member::Function("intersect", intersect),
    ],
};

pub const TRANSFORMS: Namespace = Namespace {
    name: "transforms",
    members: &[
        Member::Function("translate", translate),
        Member::Function("translateX", translate_x),
        Member::Function("translateY", translate_y),
        Member::Function("translateZ", translate_z),
        Member::Function("rotate", rotate),
        Member::Function("rotateX", rotate_x),
        Member::Function("rotateY", rotate_y),
        Member::Function("rotateZ", rotate_z),
        Member::Function("scale", scale),
        Member::Function("center", center),
    ],
};

pub const EXTRUSIONS: Namespace = Namespace {
    name: "extrusions",
    members: &[
        Member::Function("extrudeLinear", extrude_linear),
        Member::Function("extrudeRotate", extrude_rotate),
    ],
};

pub const HULLS: Namespace = Namespace {
    name: "hulls",
    members: &[
        Member::Function("hull", hull),
        Member::Function("hullChain", hull_chain),
    ],
};

/// Every geometry namespace, in the order `require` exposes them.
pub const GEOMETRY_NAMESPACES: [&Namespace; 5] =
    [&PRIMITIVES, &BOOLEANS, &TRANSFORMS, &EXTRUSIONS, &HULLS];

// === Primitives ===

fn cuboid(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("cuboid", &args)?;
    let size = args::vector_opt("cuboid", &opts, "size", [2.0; 3], true)?;
    let center = args::vector_opt("cuboid", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::cuboid(args::vector3(size), args::point3(center))?;
    interp.solid_value(solid)
}

/// `size` may be a number or, as generated code sometimes passes, a vector.
fn cube(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("cube", &args)?;
    let size = args::vector_opt("cube", &opts, "size", [2.0; 3], true)?;
    let center = args::vector_opt("cube", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::cuboid(args::vector3(size), args::point3(center))?;
    interp.solid_value(solid)
}

fn sphere(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("sphere", &args)?;
    let radius = args::number("sphere", &opts, "radius", 1.0)?;
    let segments = args::segments("sphere", &opts, "segments", 32)?;
    let center = args::vector_opt("sphere", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::sphere(radius, segments, args::point3(center))?;
    interp.solid_value(solid)
}

/// Accepts `radius`, or `startRadius`/`endRadius` for a cone.
fn cylinder(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("cylinder", &args)?;
    let radius = args::number("cylinder", &opts, "radius", 1.0)?;
    let start = args::number("cylinder", &opts, "startRadius", radius)?;
    let end = args::number("cylinder", &opts, "endRadius", radius)?;
    let height = args::number("cylinder", &opts, "height", 2.0)?;
    let segments = args::segments("cylinder", &opts, "segments", 32)?;
    let center = args::vector_opt("cylinder", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::frustum(start, end, height, segments, args::point3(center))?;
    interp.solid_value(solid)
}

fn rounded_cuboid(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("roundedCuboid", &args)?;
    let size = args::vector_opt("roundedCuboid", &opts, "size", [2.0; 3], true)?;
    let round_radius = args::number("roundedCuboid", &opts, "roundRadius", 0.2)?;
    let segments = args::segments("roundedCuboid", &opts, "segments", 32)?;
    let center = args::vector_opt("roundedCuboid", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::rounded_cuboid(
        args::vector3(size),
        round_radius,
        segments,
        args::point3(center),
    )?;
    interp.solid_value(solid)
}

fn rounded_cylinder(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("roundedCylinder", &args)?;
    let radius = args::number("roundedCylinder", &opts, "radius", 1.0)?;
    let height = args::number("roundedCylinder", &opts, "height", 2.0)?;
    let round_radius = args::number("roundedCylinder", &opts, "roundRadius", 0.2)?;
    let segments = args::segments("roundedCylinder", &opts, "segments", 32)?;
    let center = args::vector_opt("roundedCylinder", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::rounded_cylinder(radius, height, round_radius, segments, args::point3(center))?;
    interp.solid_value(solid)
}

fn torus(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("torus", &args)?;
    let inner = args::number("torus", &opts, "innerRadius", 1.0)?;
    let outer = args::number("torus", &opts, "outerRadius", 4.0)?;
    let inner_segments = args::segments("torus", &opts, "innerSegments", 32)?;
    let outer_segments = args::segments("torus", &opts, "outerSegments", 32)?;
    let center = args::vector_opt("torus", &opts, "center", [0.0; 3], false)?;
    let solid = shapes::torus(inner, outer, inner_segments, outer_segments, args::point3(center))?;
    interp.solid_value(solid)
}

fn polyhedron(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("polyhedron", &args)?;
    let points = match opts.get("points") {
        Some(Value::Array(items)) => items
            .borrow()
            .iter()
            .map(|p| args::vector::<3>("polyhedron", "points[]", p, false).map(args::point3))
            .collect::<ScriptResult<Vec<Point3>>>()?,
        _ => return Err(ScriptError::type_error("polyhedron: points must be an array")),
    };
    let faces = match opts.get("faces") {
        Some(Value::Array(items)) => items
            .borrow()
            .iter()
            .map(|face| face_indices(face, points.len()))
            .collect::<ScriptResult<Vec<Vec<usize>>>>()?,
        _ => return Err(ScriptError::type_error("polyhedron: faces must be an array")),
    };
    let solid = shapes::polyhedron(&points, &faces)?;
    interp.solid_value(solid)
}

fn face_indices(face: &Value, point_count: usize) -> ScriptResult<Vec<usize>> {
    let bad = || ScriptError::type_error("polyhedron: faces must be arrays of point indices");
    let Value::Array(items) = face else {
        return Err(bad());
    };
    items
        .borrow()
        .iter()
        .map(|i| match i {
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && (*n as usize) < point_count => {
                Ok(*n as usize)
            }
            _ => Err(bad()),
        })
        .collect()
}

fn rectangle(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("rectangle", &args)?;
    let size = args::vector_opt("rectangle", &opts, "size", [2.0; 2], true)?;
    let center = args::vector_opt("rectangle", &opts, "center", [0.0; 2], false)?;
    let outline = shapes::rectangle(size[0], size[1], center)?;
    interp.shape_value(outline)
}

fn square(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("square", &args)?;
    let size = args::number("square", &opts, "size", 2.0)?;
    let center = args::vector_opt("square", &opts, "center", [0.0; 2], false)?;
    let outline = shapes::rectangle(size, size, center)?;
    interp.shape_value(outline)
}

fn circle(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("circle", &args)?;
    let radius = args::number("circle", &opts, "radius", 1.0)?;
    let segments = args::segments("circle", &opts, "segments", 32)?;
    let center = args::vector_opt("circle", &opts, "center", [0.0; 2], false)?;
    let outline = shapes::circle(radius, segments, center)?;
    interp.shape_value(outline)
}

fn polygon(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("polygon", &args)?;
    let points = match opts.get("points") {
        Some(Value::Array(items)) => items
            .borrow()
            .iter()
            .map(|p| args::vector::<2>("polygon", "points[]", p, false))
            .collect::<ScriptResult<Vec<[f64; 2]>>>()?,
        _ => return Err(ScriptError::type_error("polygon: points must be an array")),
    };
    let outline = shapes::outline(points)?;
    interp.shape_value(outline)
}

// === Booleans ===

fn union(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let solids = args::solids("union", &args)?;
    interp.check_interrupts()?;
    let refs: Vec<&Solid> = solids.iter().map(|s| s.as_ref()).collect();
    let result = interp.kernel().union_all(&refs)?;
    trace!(inputs = refs.len(), polygons = result.polygon_count(), "union");
    interp.solid_value(result)
}

fn subtract(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let solids = args::solids("subtract", &args)?;
    interp.check_interrupts()?;
    let kernel = interp.kernel();
    let (first, rest) = solids
        .split_first()
        .ok_or_else(|| ScriptError::type_error("subtract: expected geometry"))?;
    let mut result = first.as_ref().clone();
    for tool in rest {
        result = kernel.subtract(&result, tool)?;
    }
    interp.solid_value(result)
}

fn intersect(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let solids = args::solids("intersect", &args)?;
    interp.check_interrupts()?;
    let kernel = interp.kernel();
    let (first, rest) = solids
        .split_first()
        .ok_or_else(|| ScriptError::type_error("intersect: expected geometry"))?;
    let mut result = first.as_ref().clone();
    for other in rest {
        result = kernel.intersect(&result, other)?;
    }
    interp.solid_value(result)
}

// === Transforms ===

/// Applies a transform to every geometry argument after the first. One
/// geometry in gives one geometry out; several give an array.
fn transform_each(
    interp: &mut Interpreter,
    function: &str,
    args: &[Value],
    solid_op: impl Fn(Solid) -> Solid,
    shape_op: impl Fn(&Outline) -> ScriptResult<Outline>,
) -> ScriptResult<Value> {
    let targets = args::geometries(function, args.get(1..).unwrap_or_default())?;
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let value = match target {
            Geometry::Solid(solid) => interp.solid_value(solid_op(solid.as_ref().clone()))?,
            Geometry::Shape(shape) => interp.shape_value(shape_op(&shape)?)?,
        };
        results.push(value);
    }
    single_or_array(interp, results)
}

/// Leading vector argument. Shorter arrays are padded with `fill`, as
/// `translate([x, y], shape)` is common in generated code.
fn leading_vector(function: &str, args: &[Value], fill: f64) -> ScriptResult<[f64; 3]> {
    let bad = || ScriptError::type_error(format!("{}: first argument must be an array of numbers", function));
    let Some(Value::Array(items)) = args.first() else {
        return Err(bad());
    };
    let items = items.borrow();
    if items.is_empty() || items.len() > 3 {
        return Err(bad());
    }
    let mut out = [fill; 3];
    for (slot, item) in out.iter_mut().zip(items.iter()) {
        match item {
            Value::Number(n) if n.is_finite() => *slot = *n,
            _ => return Err(bad()),
        }
    }
    Ok(out)
}

fn translate(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let offset = leading_vector("translate", &args, 0.0)?;
    translate_by(interp, "translate", &args, offset)
}

fn translate_by(interp: &mut Interpreter, function: &str, args: &[Value], offset: [f64; 3]) -> ScriptResult<Value> {
    let v = args::vector3(offset);
    transform_each(
        interp,
        function,
        args,
        |solid| solid.translate(v),
        |shape| Ok(shape.translate(v.x, v.y)),
    )
}

fn axis_offset(function: &str, args: &[Value], axis: usize) -> ScriptResult<[f64; 3]> {
    let amount = args::arg_number(function, args, 0)?;
    if !amount.is_finite() {
        return Err(ScriptError::type_error(format!("{}: offset must be a finite number", function)));
    }
    let mut offset = [0.0; 3];
    offset[axis] = amount;
    Ok(offset)
}

fn translate_x(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let offset = axis_offset("translateX", &args, 0)?;
    translate_by(interp, "translateX", &args, offset)
}

fn translate_y(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let offset = axis_offset("translateY", &args, 1)?;
    translate_by(interp, "translateY", &args, offset)
}

fn translate_z(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let offset = axis_offset("translateZ", &args, 2)?;
    translate_by(interp, "translateZ", &args, offset)
}

fn rotate(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let angles = leading_vector("rotate", &args, 0.0)?;
    rotate_by(interp, "rotate", &args, angles)
}

fn rotate_by(interp: &mut Interpreter, function: &str, args: &[Value], angles: [f64; 3]) -> ScriptResult<Value> {
    let v = args::vector3(angles);
    transform_each(
        interp,
        function,
        args,
        |solid| solid.rotate(v),
        |shape| {
            if v.x != 0.0 || v.y != 0.0 {
                return Err(ScriptError::type_error(
                    "rotate: 2D geometry can only be rotated about Z",
                ));
            }
            Ok(shape.rotate(v.z))
        },
    )
}

fn rotate_x(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let angles = axis_offset("rotateX", &args, 0)?;
    rotate_by(interp, "rotateX", &args, angles)
}

fn rotate_y(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let angles = axis_offset("rotateY", &args, 1)?;
    rotate_by(interp, "rotateY", &args, angles)
}

fn rotate_z(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let angles = axis_offset("rotateZ", &args, 2)?;
    rotate_by(interp, "rotateZ", &args, angles)
}

fn scale(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let factors = leading_vector("scale", &args, 1.0)?;
    if factors.iter().any(|f| *f == 0.0) {
        return Err(ScriptError::type_error("scale: factors must be non-zero"));
    }
    let v = args::vector3(factors);
    transform_each(
        interp,
        "scale",
        &args,
        |solid| solid.scale(v),
        |shape| {
            shape
                .scale(v.x, v.y)
                .ok_or_else(|| ScriptError::type_error("scale: result has no area"))
        },
    )
}

/// `center({ axes, relativeTo }, ...geometry)`
fn center(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("center", &args)?;
    let target = args::vector_opt("center", &opts, "relativeTo", [0.0; 3], false)?;
    let axes = match opts.get("axes") {
        None | Some(Value::Undefined) => [true; 3],
        Some(Value::Array(items)) => {
            let items = items.borrow();
            let mut axes = [false; 3];
            for (slot, item) in axes.iter_mut().zip(items.iter()) {
                *slot = item.is_truthy();
            }
            axes
        }
        Some(_) => return Err(ScriptError::type_error("center: axes must be an array of booleans")),
    };
    let target_point = args::point3(target);
    transform_each(
        interp,
        "center",
        &args,
        |solid| solid.center_on(target_point, axes),
        |shape| {
            let (min, max) = shape.bounds();
            let dx = if axes[0] { target[0] - (min[0] + max[0]) / 2.0 } else { 0.0 };
            let dy = if axes[1] { target[1] - (min[1] + max[1]) / 2.0 } else { 0.0 };
            Ok(shape.translate(dx, dy))
        },
    )
}

// === Extrusions ===

fn extrude_linear(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("extrudeLinear", &args)?;
    let params = ExtrudeParams::linear(args::number("extrudeLinear", &opts, "height", 1.0)?);
    let outlines = args::shapes("extrudeLinear", args.get(1..).unwrap_or_default())?;
    interp.check_interrupts()?;
    let kernel = interp.kernel();
    let mut results = Vec::with_capacity(outlines.len());
    for outline in &outlines {
        let solid = kernel.extrude_linear(outline, &params)?;
        results.push(interp.solid_value(solid)?);
    }
    single_or_array(interp, results)
}

fn extrude_rotate(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let opts = args::options("extrudeRotate", &args)?;
    let angle = args::number("extrudeRotate", &opts, "angle", TAU)?;
    let segments = args::segments("extrudeRotate", &opts, "segments", 12)?;
    let params = RevolveParams::partial(angle.clamp(-TAU, TAU).abs(), segments);
    let outlines = args::shapes("extrudeRotate", args.get(1..).unwrap_or_default())?;
    interp.check_interrupts()?;
    let kernel = interp.kernel();
    let mut results = Vec::with_capacity(outlines.len());
    for outline in &outlines {
        let solid = kernel.extrude_rotate(outline, &params)?;
        results.push(interp.solid_value(solid)?);
    }
    single_or_array(interp, results)
}

fn single_or_array(interp: &mut Interpreter, mut results: Vec<Value>) -> ScriptResult<Value> {
    if results.len() == 1 {
        Ok(results.remove(0))
    } else {
        interp.make_array(results)
    }
}

// === Hulls ===

fn hull(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let solids = args::solids("hull", &args)?;
    interp.check_interrupts()?;
    let refs: Vec<&Solid> = solids.iter().map(Rc::as_ref).collect();
    let result = interp.kernel().hull(&refs)?;
    interp.solid_value(result)
}

fn hull_chain(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let solids = args::solids("hullChain", &args)?;
    interp.check_interrupts()?;
    let refs: Vec<&Solid> = solids.iter().map(Rc::as_ref).collect();
    let result = interp.kernel().hull_chain(&refs)?;
    interp.solid_value(result)
}
