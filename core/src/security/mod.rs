//! Static security gate.
//!
//! Programs are scanned as raw text before anything parses them. The single
//! allowlisted import is masked out first, every denylisted match is
//! neutralized so the scan can continue past it, and any match at all
//! rejects the program.

pub mod patterns;

pub use patterns::PatternClass;

use crate::program::{Program, ValidatedProgram, MAX_PROGRAM_CHARS};
use patterns::{ALLOWED_IMPORT, DENYLIST};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Inert replacement for a denylisted match.
pub const REMOVED_MARKER: &str = "/* REMOVED */";

/// One denylisted match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub class: PatternClass,
    pub matched: String,
    /// Byte offset in the text as scanned, after masking and after the
    /// replacements made by earlier patterns.
    pub offset: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityRejection {
    #[error("No code provided")]
    Empty,

    #[error("Code too long ({length} characters, max {limit})")]
    TooLong { length: usize, limit: usize },

    #[error("Security violation: dangerous pattern detected ({})", describe(.classes))]
    Denylisted {
        classes: Vec<PatternClass>,
        violations: Vec<Violation>,
    },
}

impl SecurityRejection {
    /// Every violated class, empty for size rejections.
    pub fn classes(&self) -> &[PatternClass] {
        match self {
            SecurityRejection::Denylisted { classes, .. } => classes,
            _ => &[],
        }
    }
}

fn describe(classes: &[PatternClass]) -> String {
    classes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of scanning a text: the neutralized text and what was removed.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Input with denylisted matches replaced by [`REMOVED_MARKER`] and the
    /// allowlisted import restored verbatim.
    pub sanitized: String,
    pub violations: Vec<Violation>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn classes(&self) -> Vec<PatternClass> {
        let set: BTreeSet<PatternClass> = self.violations.iter().map(|v| v.class).collect();
        set.into_iter().collect()
    }
}

struct Masked {
    text: String,
    substitutions: Vec<(String, String)>,
}

/// Replaces each allowlisted import with a placeholder no denylist pattern
/// can match.
fn mask_allowed(text: &str) -> Masked {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let mut substitutions = Vec::new();
    let masked = ALLOWED_IMPORT.replace_all(text, |caps: &regex::Captures| {
        let placeholder = format!("__allowed_{}_{}__", nonce, substitutions.len());
        substitutions.push((placeholder.clone(), caps[0].to_string()));
        placeholder
    });
    Masked {
        text: masked.into_owned(),
        substitutions,
    }
}

fn unmask(mut text: String, substitutions: &[(String, String)]) -> String {
    for (placeholder, original) in substitutions {
        text = text.replace(placeholder.as_str(), original);
    }
    text
}

/// Scans `text` against the denylist without rejecting anything.
pub fn scan(text: &str) -> ScanReport {
    let masked = mask_allowed(text);
    let mut working = masked.text;
    let mut violations = Vec::new();

    for pattern in DENYLIST.iter() {
        let mut found = Vec::new();
        let replaced = pattern.regex.replace_all(&working, |caps: &regex::Captures| {
            if let Some(m) = caps.get(0) {
                found.push(Violation {
                    class: pattern.class,
                    matched: m.as_str().to_string(),
                    offset: m.start(),
                });
            }
            REMOVED_MARKER
        });
        if !found.is_empty() {
            working = replaced.into_owned();
            violations.extend(found);
        }
    }

    ScanReport {
        sanitized: unmask(working, &masked.substitutions),
        violations,
    }
}

/// Admits a program for execution, unchanged, or rejects it with every
/// violated pattern class.
pub fn validate(program: Program) -> Result<ValidatedProgram, SecurityRejection> {
    if program.is_blank() {
        return Err(SecurityRejection::Empty);
    }
    let length = program.char_count();
    if length > MAX_PROGRAM_CHARS {
        return Err(SecurityRejection::TooLong {
            length,
            limit: MAX_PROGRAM_CHARS,
        });
    }

    let report = scan(program.as_str());
    if !report.is_clean() {
        let classes = report.classes();
        warn!(classes = %describe(&classes), hits = report.violations.len(), "program rejected by security gate");
        return Err(SecurityRejection::Denylisted {
            classes,
            violations: report.violations,
        });
    }
    debug!(chars = length, "program passed security gate");
    Ok(ValidatedProgram::new(program))
}
