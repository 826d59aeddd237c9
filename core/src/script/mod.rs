//! Embedded interpreter for the modeling language.
//!
//! Scripts are a small JavaScript subset: enough for generated modeling code
//! (functions, arrow functions, destructuring, loops, arrays and objects) and
//! nothing that reaches outside the interpreter. The root scope is whatever
//! the caller installs, normally the capability set.

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

#[cfg(test)]
mod tests_interpreter;

pub use interpreter::{Interpreter, Limits, Meter};
pub use parser::parse_program;
pub use value::{NativeFn, NativeFunction, Value};

use crate::kernel::KernelOpError;
use thiserror::Error;

/// Errors raised while parsing or running a script.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError: {message} (line {line}, column {column})")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("ReferenceError: {0}")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    #[error("GeometryError: {0}")]
    Geometry(#[from] KernelOpError),

    #[error("Uncaught {0}")]
    Thrown(String),

    #[error("execution budget exhausted: {0}")]
    BudgetExhausted(BudgetKind),

    #[error("execution cancelled")]
    Cancelled,
}

/// Which execution budget a run ran out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Steps,
    Deadline,
    Polygons,
    Memory,
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetKind::Steps => write!(f, "instruction step limit reached"),
            BudgetKind::Deadline => write!(f, "wall-clock deadline passed"),
            BudgetKind::Polygons => write!(f, "polygon limit reached"),
            BudgetKind::Memory => write!(f, "allocation limit reached"),
        }
    }
}

impl ScriptError {
    /// Steps and deadline exhaustion are reported as timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ScriptError::BudgetExhausted(BudgetKind::Steps | BudgetKind::Deadline)
        )
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::Type(message.into())
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
