//! Pure intrinsics: `Math` and `Array`.
//!
//! There is no `Math.random`; a program must map to the same part every run.

use super::args;
use super::{Member, Namespace};
use crate::script::{Interpreter, ScriptError, ScriptResult, Value};
use std::f64::consts;

macro_rules! unary_math {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(
            fn $name(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
                let x = args.first().map(Value::to_number).unwrap_or(f64::NAN);
                let f: fn(f64) -> f64 = $f;
                Ok(Value::Number(f(x)))
            }
        )*
    };
}

unary_math! {
    abs => f64::abs,
    ceil => f64::ceil,
    floor => f64::floor,
    round => |x| (x + 0.5).floor(),
    trunc => f64::trunc,
    sign => |x| if x.is_nan() || x == 0.0 { x } else { x.signum() },
    sqrt => f64::sqrt,
    cbrt => f64::cbrt,
    exp => f64::exp,
    log => f64::ln,
    log2 => f64::log2,
    log10 => f64::log10,
    sin => f64::sin,
    cos => f64::cos,
    tan => f64::tan,
    asin => f64::asin,
    acos => f64::acos,
    atan => f64::atan,
}

pub const MATH: Namespace = Namespace {
    name: "Math",
    members: &[
        Member::Constant("PI", consts::PI),
        Member::Constant("E", consts::E),
        Member::Constant("SQRT2", consts::SQRT_2),
        Member::Constant("SQRT1_2", consts::FRAC_1_SQRT_2),
        Member::Constant("LN2", consts::LN_2),
        Member::Constant("LN10", consts::LN_10),
        Member::Function("abs", abs),
        Member::Function("ceil", ceil),
        Member::Function("floor", floor),
        Member::Function("round", round),
        Member::Function("trunc", trunc),
        Member::Function("sign", sign),
        Member::Function("sqrt", sqrt),
        Member::Function("cbrt", cbrt),
        Member::Function("exp", exp),
        Member::Function("log", log),
        Member::Function("log2", log2),
        Member::Function("log10", log10),
        Member::Function("sin", sin),
        Member::Function("cos", cos),
        Member::Function("tan", tan),
        Member::Function("asin", asin),
        Member::Function("acos", acos),
        Member::Function("atan", atan),
        Member::Function("atan2", atan2),
        Member::Function("pow", pow),
        Member::Function("hypot", hypot),
        Member::Function("min", min),
        Member::Function("max", max),
    ],
};

pub const ARRAY: Namespace = Namespace {
    name: "Array",
    members: &[
        Member::Function("from", array_from),
        Member::Function("isArray", array_is_array),
    ],
};

fn atan2(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let y = args::arg_number("Math.atan2", &args, 0)?;
    let x = args::arg_number("Math.atan2", &args, 1)?;
    Ok(Value::Number(y.atan2(x)))
}

fn pow(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let base = args::arg_number("Math.pow", &args, 0)?;
    let exponent = args::arg_number("Math.pow", &args, 1)?;
    Ok(Value::Number(base.powf(exponent)))
}

fn hypot(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let sum: f64 = args.iter().map(|v| v.to_number().powi(2)).sum();
    Ok(Value::Number(sum.sqrt()))
}

fn min(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::Number(fold_extreme(&args, f64::INFINITY, f64::min)))
}

fn max(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::Number(fold_extreme(&args, f64::NEG_INFINITY, f64::max)))
}

/// NaN anywhere poisons the result, unlike `f64::min`.
fn fold_extreme(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for arg in args {
        let n = arg.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = pick(acc, n);
    }
    acc
}

/// `Array.from(iterable)` or `Array.from({ length }, (value, index) => ...)`.
fn array_from(interp: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let items = match args.first() {
        Some(Value::Array(items)) => {
            interp.charge_cells(items.borrow().len())?;
            items.borrow().clone()
        }
        Some(Value::Str(s)) => s.chars().map(|c| Value::str(&c.to_string())).collect(),
        Some(Value::Object(map)) => {
            let length = map.borrow().get("length").map(Value::to_number).unwrap_or(0.0);
            if !length.is_finite() || length < 0.0 {
                return Err(ScriptError::Range("Invalid array length".into()));
            }
            let length = length as usize;
            if length > interp.meter().limits().max_array_len {
                return Err(ScriptError::Range(format!(
                    "array length {} exceeds the limit of {}",
                    length,
                    interp.meter().limits().max_array_len
                )));
            }
            interp.charge_cells(length)?;
            vec![Value::Undefined; length]
        }
        Some(other) => {
            return Err(ScriptError::type_error(format!(
                "Array.from: {} is not iterable",
                other.type_name()
            )))
        }
        None => return Err(ScriptError::type_error("Array.from: undefined is not iterable")),
    };

    let items = match args.get(1) {
        None | Some(Value::Undefined) => items,
        Some(f) if f.is_callable() => {
            let mut mapped = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                mapped.push(interp.call_value(f, vec![item, Value::Number(i as f64)])?);
            }
            mapped
        }
        Some(other) => {
            return Err(ScriptError::type_error(format!(
                "Array.from: {} is not a function",
                other.type_name()
            )))
        }
    };
    interp.make_array(items)
}

fn array_is_array(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_)))))
}
