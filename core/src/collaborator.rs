//! Generation collaborator seam.
//!
//! A collaborator turns a natural-language request, optionally with the
//! program that failed and why, into raw response text. [`RetryingCollaborator`]
//! cleans and shape-checks that text and retries transient failures.

use crate::program::Program;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// Marks where code begins in an analysis-then-code response.
pub const CODE_START_MARKER: &str = "// --- CODE START ---";

/// Longest accepted natural-language request, in characters.
pub const MAX_PROMPT_CHARS: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Prompt is empty")]
    Empty,

    #[error("Prompt has {actual} characters, the limit is {max}")]
    TooLong { actual: usize, max: usize },
}

static SCRIPT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid regex"));

static MARKUP_HOOK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript:|\bon\w+\s*=").expect("valid regex"));

/// A natural-language request cleared for the generation service: markup
/// injection stripped, trimmed, non-empty and at most [`MAX_PROMPT_CHARS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Prompt(String);

impl Prompt {
    pub fn new(raw: &str) -> Result<Self, PromptError> {
        let stripped = SCRIPT_TAG.replace_all(raw, "");
        let stripped = MARKUP_HOOK.replace_all(&stripped, "");
        let text = stripped.trim();
        if text.is_empty() {
            return Err(PromptError::Empty);
        }
        let actual = text.chars().count();
        if actual > MAX_PROMPT_CHARS {
            return Err(PromptError::TooLong {
                actual,
                max: MAX_PROMPT_CHARS,
            });
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub natural_language_spec: String,
    pub prior_program: Option<Program>,
    pub prior_error: Option<String>,
}

impl GenerationRequest {
    pub fn initial(spec: impl Into<String>) -> Self {
        Self {
            natural_language_spec: spec.into(),
            prior_program: None,
            prior_error: None,
        }
    }

    /// Asks for a fix of `failing_program`, which failed with `error`.
    pub fn correction(spec: impl Into<String>, failing_program: Program, error: impl Into<String>) -> Self {
        Self {
            natural_language_spec: spec.into(),
            prior_program: Some(failing_program),
            prior_error: Some(error.into()),
        }
    }

    pub fn is_correction(&self) -> bool {
        self.prior_error.is_some()
    }

    /// Prompt text for a text-completion model.
    pub fn prompt(&self) -> String {
        match (&self.prior_program, &self.prior_error) {
            (Some(program), Some(error)) => format!(
                "The following JSCAD program failed with the error: \"{error}\"\n\n\
                 FAILING PROGRAM:\n```javascript\n{program}\n```\n\n\
                 ORIGINAL REQUEST: \"{spec}\"\n\n\
                 Fix the program. It must:\n\
                 1. Be syntactically valid\n\
                 2. Use only primitives, booleans, transforms, extrusions and hulls from @jscad/modeling\n\
                 3. Define a main() function that returns a geometry\n\n\
                 Return ONLY the corrected JavaScript, without markdown or explanations.\n\
                 Start directly with \"const main\" or \"function main\".",
                error = error,
                program = program,
                spec = self.natural_language_spec,
            ),
            (Some(program), None) => format!(
                "Modify this JSCAD program: \"{spec}\"\n\n\
                 EXISTING PROGRAM:\n```javascript\n{program}\n```\n\n\
                 Keep its structure and return ONLY the complete JavaScript, without markdown.",
                spec = self.natural_language_spec,
                program = program,
            ),
            _ => format!(
                "Generate JSCAD code for: \"{spec}\"\n\n\
                 AVAILABLE:\n\
                 - primitives: cuboid, cube, cylinder, sphere, roundedCuboid, roundedCylinder, torus, polyhedron, rectangle, circle, polygon\n\
                 - booleans: union, subtract, intersect\n\
                 - transforms: translate, rotate, scale, center\n\
                 - extrusions: extrudeLinear, extrudeRotate\n\
                 - hulls: hull, hullChain\n\n\
                 EXAMPLE:\n\
                 const main = () => {{\n\
                 \x20 const shaft = primitives.cylinder({{ radius: 3, height: 30, segments: 32 }});\n\
                 \x20 const head = transforms.translate([0, 0, 15], primitives.cylinder({{ radius: 5, height: 4, segments: 32 }}));\n\
                 \x20 return booleans.union(shaft, head);\n\
                 }};\n\n\
                 RULES:\n\
                 - Return ONLY code (no markdown, no backticks)\n\
                 - main() MUST return a geometry\n\
                 - Use millimeters",
                spec = self.natural_language_spec,
            ),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Transport(_)
                | CollaboratorError::RateLimited { .. }
                | CollaboratorError::ServiceUnavailable(_)
                | CollaboratorError::MalformedResponse(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CollaboratorError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Produces raw response text for a request.
#[async_trait]
pub trait GenerationCollaborator: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Wraps a collaborator with cleanup, shape checks and bounded retries.
#[derive(Clone)]
pub struct RetryingCollaborator {
    inner: Arc<dyn GenerationCollaborator>,
    config: RetryConfig,
}

impl RetryingCollaborator {
    pub fn new(inner: Arc<dyn GenerationCollaborator>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn with_defaults(inner: Arc<dyn GenerationCollaborator>) -> Self {
        Self::new(inner, RetryConfig::default())
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Requests a program, retrying retryable failures with exponential backoff.
    #[instrument(skip_all, fields(collaborator = self.inner.name(), correction = request.is_correction()))]
    pub async fn request_program(&self, request: &GenerationRequest) -> Result<Program, CollaboratorError> {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=attempts {
            let result = self
                .inner
                .generate(request)
                .await
                .and_then(|raw| accept_response(&raw));
            match result {
                Ok(program) => {
                    debug!(attempt, chars = program.char_count(), "collaborator produced a program");
                    return Ok(program);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = e.retry_after().unwrap_or(backoff).min(self.config.max_backoff);
                    warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "collaborator request failed, retrying");
                    sleep(delay).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "collaborator request failed");
                    return Err(e);
                }
            }
        }
        Err(CollaboratorError::ServiceUnavailable(
            "no attempts were made".to_string(),
        ))
    }
}

fn accept_response(raw: &str) -> Result<Program, CollaboratorError> {
    let code = extract_program(raw);
    check_program_shape(&code).map_err(CollaboratorError::MalformedResponse)?;
    Ok(Program::new(code))
}

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)```[ \t]*(?:javascript|js|jscad|typescript|ts)?[ \t]*\r?\n?").expect("valid regex")
});

static MAIN_DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bfunction\s+main\s*\(|\b(?:const|let|var)\s+main\s*=").expect("valid regex")
});

static EXPRESSION_ARROW_MAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bmain\s*=\s*\([^)]*\)\s*=>\s*[^\s{]").expect("valid regex")
});

static RETURN_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\breturn\b").expect("valid regex"));

/// Strips an analysis preamble and markdown fences from a response.
pub fn extract_program(raw: &str) -> String {
    let code = match raw.split_once(CODE_START_MARKER) {
        Some((_, after)) => after,
        None => raw,
    };
    FENCE.replace_all(code, "").trim().to_string()
}

/// Cheap structural checks on cleaned response text.
pub fn check_program_shape(code: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("response contains no code".to_string());
    }
    if !MAIN_DEFINITION.is_match(code) {
        return Err("response does not define main()".to_string());
    }
    if !RETURN_KEYWORD.is_match(code) && !EXPRESSION_ARROW_MAIN.is_match(code) {
        return Err("main() never returns a value".to_string());
    }
    if !braces_balanced(code) {
        return Err("unbalanced braces".to_string());
    }
    Ok(())
}

/// Brace balance outside string literals and comments.
fn braces_balanced(code: &str) -> bool {
    let mut depth: i64 = 0;
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            '"' | '\'' | '`' => {
                while let Some(next) = chars.next() {
                    if next == '\\' {
                        chars.next();
                    } else if next == c {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_is_trimmed_and_stripped() {
        let prompt = Prompt::new("  <script>alert(1)</script>a washer onclick= 8mm  ").unwrap();
        assert_eq!(prompt.as_str(), "a washer  8mm");
        assert_eq!(Prompt::new("JavaScript:a cube").unwrap().as_str(), "a cube");
    }

    #[test]
    fn test_prompt_bounds() {
        assert_eq!(Prompt::new("   "), Err(PromptError::Empty));
        assert_eq!(Prompt::new("<script>x</script>"), Err(PromptError::Empty));
        assert!(Prompt::new(&"é".repeat(MAX_PROMPT_CHARS)).is_ok());
        assert_eq!(
            Prompt::new(&"a".repeat(MAX_PROMPT_CHARS + 1)),
            Err(PromptError::TooLong {
                actual: MAX_PROMPT_CHARS + 1,
                max: MAX_PROMPT_CHARS
            })
        );
    }
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, CollaboratorError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, CollaboratorError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl GenerationCollaborator for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _: &GenerationRequest) -> Result<String, CollaboratorError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CollaboratorError::ServiceUnavailable("script exhausted".into())))
        }
    }

    const GOOD: &str = "const main = () => {\n  return primitives.cube({ size: 10 });\n};";

    #[test]
    fn test_extract_strips_fences_and_preamble() {
        let raw = format!(
            "// --- ANALYSIS ---\n// a cube\n\n{}\n```javascript\n{}\n```\n",
            CODE_START_MARKER, GOOD
        );
        assert_eq!(extract_program(&raw), GOOD);
        assert_eq!(extract_program(&format!("```js\n{}\n```", GOOD)), GOOD);
    }

    #[test]
    fn test_shape_checks() {
        assert!(check_program_shape(GOOD).is_ok());
        assert!(check_program_shape("const main = () => primitives.cube({ size: 1 })").is_ok());
        assert!(check_program_shape("").is_err());
        assert!(check_program_shape("const x = () => { return 1; }").is_err());
        assert!(check_program_shape("function main() { primitives.cube(); }").is_err());
        assert!(check_program_shape("function main() { return { a: 1 };").is_err());
        assert!(check_program_shape("function main() { return '}'; } // }").is_ok());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CollaboratorError::Transport("reset".into()).is_retryable());
        assert!(CollaboratorError::MalformedResponse("x".into()).is_retryable());
        assert!(!CollaboratorError::Auth("bad key".into()).is_retryable());
    }

    #[test]
    fn test_correction_prompt_mentions_failure() {
        let request = GenerationRequest::correction("a cube", Program::new(GOOD), "TypeError: boom");
        let prompt = request.prompt();
        assert!(prompt.contains("TypeError: boom"));
        assert!(prompt.contains(GOOD));
        assert!(prompt.contains("a cube"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_retried_once() {
        let inner = Scripted::new(vec![
            Err(CollaboratorError::Transport("reset".into())),
            Ok(format!("```\n{}\n```", GOOD)),
        ]);
        let collaborator = RetryingCollaborator::with_defaults(inner.clone());
        let program = collaborator
            .request_program(&GenerationRequest::initial("a cube"))
            .await
            .unwrap();
        assert_eq!(program.as_str(), GOOD);
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let inner = Scripted::new(vec![
            Ok("Sorry, I can't help with that.".to_string()),
            Ok("still no code".to_string()),
            Ok(GOOD.to_string()),
        ]);
        let collaborator = RetryingCollaborator::with_defaults(inner.clone());
        let err = collaborator
            .request_program(&GenerationRequest::initial("a cube"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::MalformedResponse(_)));
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let inner = Scripted::new(vec![Err(CollaboratorError::Auth("bad key".into()))]);
        let collaborator = RetryingCollaborator::with_defaults(inner.clone());
        let err = collaborator
            .request_program(&GenerationRequest::initial("a cube"))
            .await
            .unwrap_err();
        assert_eq!(err, CollaboratorError::Auth("bad key".into()));
        assert_eq!(inner.calls(), 1);
    }
}
