//! Argument decoding shared by the native capability functions.

use crate::geometry::{Outline, Point3, Solid, Vector3};
use crate::script::value::Object;
use crate::script::{ScriptError, ScriptResult, Value};
use std::rc::Rc;

/// Segment counts are clamped into this range rather than rejected.
pub const MIN_SEGMENTS: usize = 3;
pub const MAX_SEGMENTS: usize = 256;

/// Geometry argument after flattening nested arrays.
pub enum Geometry {
    Solid(Rc<Solid>),
    Shape(Rc<Outline>),
}

/// The options object passed as the first argument, or an empty one.
pub fn options(function: &str, args: &[Value]) -> ScriptResult<Object> {
    match args.first() {
        None | Some(Value::Undefined) => Ok(Object::new()),
        Some(Value::Object(map)) => Ok(map.borrow().clone()),
        Some(other) => Err(ScriptError::type_error(format!(
            "{}: expected an options object, got {}",
            function,
            other.type_name()
        ))),
    }
}

fn present<'a>(opts: &'a Object, key: &str) -> Option<&'a Value> {
    opts.get(key).filter(|v| !matches!(v, Value::Undefined))
}

pub fn number(function: &str, opts: &Object, key: &str, default: f64) -> ScriptResult<f64> {
    match present(opts, key) {
        None => Ok(default),
        Some(Value::Number(n)) if n.is_finite() => Ok(*n),
        Some(other) => Err(ScriptError::type_error(format!(
            "{}: {} must be a finite number, got {}",
            function,
            key,
            other.to_display_string()
        ))),
    }
}

pub fn segments(function: &str, opts: &Object, key: &str, default: usize) -> ScriptResult<usize> {
    let n = number(function, opts, key, default as f64)?;
    Ok((n.round().max(0.0) as usize).clamp(MIN_SEGMENTS, MAX_SEGMENTS))
}

pub fn boolean(function: &str, opts: &Object, key: &str, default: bool) -> ScriptResult<bool> {
    match present(opts, key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ScriptError::type_error(format!(
            "{}: {} must be a boolean, got {}",
            function,
            key,
            other.type_name()
        ))),
    }
}

/// A fixed-length numeric array. A bare number is repeated when `splat` is set.
pub fn vector<const N: usize>(function: &str, name: &str, value: &Value, splat: bool) -> ScriptResult<[f64; N]> {
    let bad = || {
        ScriptError::type_error(format!(
            "{}: {} must be an array of {} numbers",
            function, name, N
        ))
    };
    match value {
        Value::Number(n) if splat && n.is_finite() => Ok([*n; N]),
        Value::Array(items) => {
            let items = items.borrow();
            if items.len() != N {
                return Err(bad());
            }
            let mut out = [0.0; N];
            for (slot, item) in out.iter_mut().zip(items.iter()) {
                match item {
                    Value::Number(n) if n.is_finite() => *slot = *n,
                    _ => return Err(bad()),
                }
            }
            Ok(out)
        }
        _ => Err(bad()),
    }
}

pub fn vector_opt<const N: usize>(
    function: &str,
    opts: &Object,
    key: &str,
    default: [f64; N],
    splat: bool,
) -> ScriptResult<[f64; N]> {
    match present(opts, key) {
        None => Ok(default),
        Some(value) => vector(function, key, value, splat),
    }
}

pub fn point3(v: [f64; 3]) -> Point3 {
    Point3::new(v[0], v[1], v[2])
}

pub fn vector3(v: [f64; 3]) -> Vector3 {
    Vector3::new(v[0], v[1], v[2])
}

/// Geometry arguments, with nested arrays flattened.
pub fn geometries(function: &str, args: &[Value]) -> ScriptResult<Vec<Geometry>> {
    let mut out = Vec::new();
    collect(function, args, &mut out)?;
    if out.is_empty() {
        return Err(ScriptError::type_error(format!(
            "{}: wrong number of arguments, expected geometry",
            function
        )));
    }
    Ok(out)
}

fn collect(function: &str, args: &[Value], out: &mut Vec<Geometry>) -> ScriptResult<()> {
    for arg in args {
        match arg {
            Value::Solid(solid) => out.push(Geometry::Solid(solid.clone())),
            Value::Shape(shape) => out.push(Geometry::Shape(shape.clone())),
            Value::Array(items) => collect(function, &items.borrow(), out)?,
            other => {
                return Err(ScriptError::type_error(format!(
                    "{}: expected geometry, got {}",
                    function,
                    other.type_name()
                )))
            }
        }
    }
    Ok(())
}

/// 3D geometry arguments only.
pub fn solids(function: &str, args: &[Value]) -> ScriptResult<Vec<Rc<Solid>>> {
    geometries(function, args)?
        .into_iter()
        .map(|g| match g {
            Geometry::Solid(solid) => Ok(solid),
            Geometry::Shape(_) => Err(ScriptError::type_error(format!(
                "{}: 2D geometry is not supported, extrude it first",
                function
            ))),
        })
        .collect()
}

/// 2D geometry arguments only.
pub fn shapes(function: &str, args: &[Value]) -> ScriptResult<Vec<Rc<Outline>>> {
    geometries(function, args)?
        .into_iter()
        .map(|g| match g {
            Geometry::Shape(shape) => Ok(shape),
            Geometry::Solid(_) => Err(ScriptError::type_error(format!(
                "{}: expected 2D geometry, got 3D geometry",
                function
            ))),
        })
        .collect()
}

pub fn arg_number(function: &str, args: &[Value], index: usize) -> ScriptResult<f64> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Ok(other.to_number()),
        None => Err(ScriptError::type_error(format!(
            "{}: missing argument {}",
            function,
            index + 1
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(entries: &[(&str, Value)]) -> Object {
        entries
            .iter()
            .map(|(k, v)| (Rc::from(*k), v.clone()))
            .collect()
    }

    #[test]
    fn test_number_defaults_and_type_errors() {
        let o = opts(&[("radius", Value::Number(3.0)), ("height", Value::str("tall"))]);
        assert_eq!(number("f", &o, "radius", 1.0).unwrap(), 3.0);
        assert_eq!(number("f", &o, "missing", 1.0).unwrap(), 1.0);
        assert!(number("f", &o, "height", 1.0).is_err());
    }

    #[test]
    fn test_segments_are_clamped() {
        let o = opts(&[("segments", Value::Number(1.0e9)), ("low", Value::Number(1.0))]);
        assert_eq!(segments("f", &o, "segments", 32).unwrap(), MAX_SEGMENTS);
        assert_eq!(segments("f", &o, "low", 32).unwrap(), MIN_SEGMENTS);
    }

    #[test]
    fn test_vector_shapes() {
        let v = Value::array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        assert_eq!(vector::<3>("f", "size", &v, false).unwrap(), [1.0, 2.0, 3.0]);
        assert!(vector::<2>("f", "size", &v, false).is_err());
        assert_eq!(vector::<3>("f", "size", &Value::Number(4.0), true).unwrap(), [4.0; 3]);
        assert!(vector::<3>("f", "size", &Value::Number(4.0), false).is_err());
    }

    #[test]
    fn test_geometries_flatten_and_reject_non_geometry() {
        let a = Value::solid(Solid::empty());
        let nested = Value::array(vec![a.clone(), Value::array(vec![a.clone()])]);
        assert_eq!(solids("union", &[nested]).unwrap().len(), 2);
        assert!(geometries("union", &[Value::Number(1.0)]).is_err());
        assert!(geometries("union", &[]).is_err());
    }
}
