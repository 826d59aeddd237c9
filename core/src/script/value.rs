//! Runtime values and lexical scopes.

use super::ast::FunctionDef;
use super::interpreter::Interpreter;
use super::{ScriptError, ScriptResult};
use crate::geometry::{Outline, Solid};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// Host function callable from scripts.
pub type NativeFn = fn(&mut Interpreter, Vec<Value>) -> ScriptResult<Value>;

pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

/// A script function together with the scope it was created in.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: Env,
}

pub type Object = BTreeMap<Rc<str>, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Solid(Rc<Solid>),
    Shape(Rc<Outline>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn native(name: &'static str, func: NativeFn) -> Self {
        Value::Native(Rc::new(NativeFunction { name, func }))
    }

    pub fn solid(solid: Solid) -> Self {
        Value::Solid(Rc::new(solid))
    }

    /// Name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Solid(_) => "3D geometry",
            Value::Shape(_) => "2D geometry",
        }
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Solid(_) | Value::Shape(_) => {
                "object"
            }
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion as used by `+` and `join`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_display_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(c) => format!(
                "function {}() {{ ... }}",
                c.def.name.as_deref().unwrap_or("")
            ),
            Value::Native(n) => format!("function {}() {{ [native code] }}", n.name),
            Value::Solid(_) => "[object Geom3]".to_string(),
            Value::Shape(_) => "[object Geom2]".to_string(),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Solid(a), Value::Solid(b)) => Rc::ptr_eq(a, b),
            (Value::Shape(a), Value::Shape(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_equals(other),
        }
    }

    /// `includes` equality: like `===` but NaN matches NaN.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(items) => write!(f, "Array(len={})", items.borrow().len()),
            Value::Object(map) => {
                let keys: Vec<String> = map.borrow().keys().map(|k| k.to_string()).collect();
                write!(f, "Object{{{}}}", keys.join(", "))
            }
            Value::Solid(s) => write!(f, "Solid(polygons={})", s.polygon_count()),
            Value::Shape(s) => write!(f, "Shape(points={})", s.len()),
            other => write!(f, "{}", other.to_display_string()),
        }
    }
}

/// Number formatting that matches what scripts expect from `String(n)`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// One lexical scope. Lookups walk the parent chain; the outermost scope is
/// installed by the embedder and there is no implicit global beyond it.
#[derive(Default)]
pub struct Scope {
    vars: HashMap<Rc<str>, Binding>,
    parent: Option<Env>,
}

pub type Env = Rc<RefCell<Scope>>;

impl Scope {
    pub fn new_root() -> Env {
        Rc::new(RefCell::new(Scope::default()))
    }

    pub fn child(parent: &Env) -> Env {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
        }))
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn names(&self) -> Vec<Rc<str>> {
        let mut names: Vec<Rc<str>> = self.vars.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn declare(&mut self, name: Rc<str>, value: Value, mutable: bool) {
        self.vars.insert(name, Binding { value, mutable });
    }

    /// Drops every binding, breaking reference cycles through closures.
    pub fn clear(&mut self) {
        self.vars.clear();
        self.parent = None;
    }
}

pub fn lookup(env: &Env, name: &str) -> Option<Value> {
    let mut current = env.clone();
    loop {
        let next = {
            let scope = current.borrow();
            if let Some(binding) = scope.vars.get(name) {
                return Some(binding.value.clone());
            }
            scope.parent.clone()
        };
        current = next?;
    }
}

pub fn assign(env: &Env, name: &str, value: Value) -> ScriptResult<()> {
    let mut current = env.clone();
    loop {
        let next = {
            let mut scope = current.borrow_mut();
            if let Some(binding) = scope.vars.get_mut(name) {
                if !binding.mutable {
                    return Err(ScriptError::type_error(format!(
                        "Assignment to constant variable '{}'.",
                        name
                    )));
                }
                binding.value = value;
                return Ok(());
            }
            scope.parent.clone()
        };
        match next {
            Some(parent) => current = parent,
            None => return Err(ScriptError::Reference(format!("{} is not defined", name))),
        }
    }
}
