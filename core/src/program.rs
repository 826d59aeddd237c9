//! Program text as received from the generation collaborator or the user.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted program, in characters.
pub const MAX_PROGRAM_CHARS: usize = 50_000;

/// Immutable program text. A corrected program is a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Program {
    text: String,
}

impl Program {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Program {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Program {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// A program that passed the security gate. Only the gate constructs these,
/// and only these reach the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProgram(Program);

impl ValidatedProgram {
    pub(crate) fn new(program: Program) -> Self {
        Self(program)
    }

    pub fn program(&self) -> &Program {
        &self.0
    }

    pub fn into_program(self) -> Program {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}
