//! Denylist pattern table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a denylisted construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternClass {
    DynamicCode,
    ModuleLoading,
    Network,
    Storage,
    HostGlobals,
    MessagePassing,
}

impl fmt::Display for PatternClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PatternClass::DynamicCode => "dynamic code loading",
            PatternClass::ModuleLoading => "module loading",
            PatternClass::Network => "network access",
            PatternClass::Storage => "persistent storage",
            PatternClass::HostGlobals => "host globals",
            PatternClass::MessagePassing => "message passing",
        };
        f.write_str(text)
    }
}

pub struct DenyPattern {
    pub class: PatternClass,
    pub regex: Regex,
}

/// `(class, pattern, case_insensitive)`. The `Function` constructor is
/// matched case-sensitively so ordinary `function` declarations pass.
const SOURCES: &[(PatternClass, &str, bool)] = &[
    (PatternClass::DynamicCode, r"\beval\s*\(", true),
    (PatternClass::DynamicCode, r"\bFunction\s*\(", false),
    (PatternClass::DynamicCode, r"\bnew\s+Function\b", false),
    (PatternClass::ModuleLoading, r"\bimport\b", true),
    (PatternClass::ModuleLoading, r"\brequire\s*\(", true),
    (PatternClass::Network, r"\bfetch\s*\(", true),
    (PatternClass::Network, r"XMLHttpRequest", true),
    (PatternClass::Network, r"WebSocket", true),
    (PatternClass::Network, r"EventSource", true),
    (PatternClass::Storage, r"localStorage", true),
    (PatternClass::Storage, r"sessionStorage", true),
    (PatternClass::Storage, r"indexedDB", true),
    (PatternClass::HostGlobals, r"\bdocument\s*\.", true),
    (PatternClass::HostGlobals, r"\bwindow\s*\.", true),
    (PatternClass::HostGlobals, r"\bself\s*\.", true),
    (PatternClass::HostGlobals, r"\bglobalThis\b", true),
    (PatternClass::MessagePassing, r"\bpostMessage\s*\(", true),
    (PatternClass::MessagePassing, r"\bonmessage\b", true),
];

pub static DENYLIST: Lazy<Vec<DenyPattern>> = Lazy::new(|| {
    SOURCES
        .iter()
        .map(|(class, source, insensitive)| {
            let source = if *insensitive {
                format!("(?i){}", source)
            } else {
                source.to_string()
            };
            DenyPattern {
                class: *class,
                regex: Regex::new(&source).expect("denylist pattern is valid"),
            }
        })
        .collect()
});

/// The one permitted module import.
pub static ALLOWED_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"require\s*\(\s*(?:'@jscad/modeling'|"@jscad/modeling")\s*\)"#)
        .expect("allowlist pattern is valid")
});
