//! The capability set: the complete table of names a running program can see.
//!
//! A script's outermost scope is built from this table and nothing else, so
//! anything not listed here simply does not exist inside the sandbox.

pub mod args;
pub mod math;
pub mod modeling;

#[cfg(test)]
mod tests_capabilities;

use crate::script::value::{Env, Object, Scope};
use crate::script::{Interpreter, NativeFn, ScriptResult, Value};
use std::rc::Rc;

/// The one module name `require` resolves.
pub const MODELING_MODULE: &str = "@jscad/modeling";

/// Entry of a namespace object.
#[derive(Clone, Copy)]
pub enum Member {
    Function(&'static str, NativeFn),
    Constant(&'static str, f64),
}

impl Member {
    pub fn name(&self) -> &'static str {
        match self {
            Member::Function(name, _) | Member::Constant(name, _) => *name,
        }
    }
}

/// A named object of functions and constants, e.g. `primitives` or `Math`.
#[derive(Clone, Copy)]
pub struct Namespace {
    pub name: &'static str,
    pub members: &'static [Member],
}

impl Namespace {
    /// Builds a fresh object for one interpreter.
    pub fn to_value(&self) -> Value {
        let mut object = Object::new();
        for member in self.members {
            let value = match *member {
                Member::Function(name, func) => Value::native(name, func),
                Member::Constant(_, n) => Value::Number(n),
            };
            object.insert(Rc::from(member.name()), value);
        }
        Value::object(object)
    }
}

#[derive(Clone, Copy)]
pub enum Capability {
    Namespace(&'static Namespace),
    Function(&'static str, NativeFn),
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Namespace(ns) => ns.name,
            Capability::Function(name, _) => *name,
        }
    }
}

/// Fixed, enumerable table of top-level bindings.
///
/// The table itself is plain static data and can be shared across threads;
/// [`CapabilitySet::install`] turns it into interpreter values on the worker
/// that runs the program.
#[derive(Clone)]
pub struct CapabilitySet {
    entries: Vec<Capability>,
}

impl CapabilitySet {
    /// Geometry namespaces, `require`, `Math` and `Array`.
    pub fn standard() -> Self {
        let mut entries: Vec<Capability> = modeling::GEOMETRY_NAMESPACES
            .iter()
            .map(|ns| Capability::Namespace(*ns))
            .collect();
        entries.push(Capability::Function("require", require));
        entries.push(Capability::Namespace(&math::MATH));
        entries.push(Capability::Namespace(&math::ARRAY));
        Self { entries }
    }

    pub fn entries(&self) -> &[Capability] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(Capability::name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name() == name)
    }

    /// Creates the root scope for one interpreter. Bindings are constant.
    pub fn install(&self) -> Env {
        let root = Scope::new_root();
        {
            let mut scope = root.borrow_mut();
            for entry in &self.entries {
                let value = match entry {
                    Capability::Namespace(ns) => ns.to_value(),
                    Capability::Function(name, func) => Value::native(*name, *func),
                };
                scope.declare(Rc::from(entry.name()), value, false);
            }
        }
        root
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::standard()
    }
}

/// `require('@jscad/modeling')` yields the geometry namespaces; any other
/// module name yields an empty object.
fn require(_: &mut Interpreter, args: Vec<Value>) -> ScriptResult<Value> {
    let mut exports = Object::new();
    if matches!(args.first(), Some(Value::Str(name)) if name.as_ref() == MODELING_MODULE) {
        for ns in modeling::GEOMETRY_NAMESPACES {
            exports.insert(Rc::from(ns.name), ns.to_value());
        }
    }
    Ok(Value::object(exports))
}
