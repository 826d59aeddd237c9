use crate::collaborator::GenerationRequest;
use crate::mesh::BinaryArtifact;
use crate::pipeline::{FailureCategory, PipelineError};
use crate::program::Program;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a state failed, in a form observers can forward to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub category: FailureCategory,
    pub message: String,
}

impl From<&PipelineError> for FailureReason {
    fn from(error: &PipelineError) -> Self {
        Self {
            category: error.category(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionState {
    Generated,
    Validating,
    Executing,
    Encoding,
    Succeeded,
    Failed(FailureReason),
}

impl CorrectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CorrectionState::Succeeded | CorrectionState::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Highest attempt number. The first run is attempt 1.
    pub retry_ceiling: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retry_ceiling: 2 }
    }
}

impl RetryPolicy {
    pub fn allows_another(&self, attempt_number: u32) -> bool {
        attempt_number < self.retry_ceiling
    }
}

/// Everything the collaborator is told about a failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionAttempt {
    pub original_prompt: String,
    pub failing_program: Program,
    pub failure_message: String,
    pub category: FailureCategory,
    pub attempt_number: u32,
}

impl From<&CorrectionAttempt> for GenerationRequest {
    fn from(attempt: &CorrectionAttempt) -> Self {
        GenerationRequest::correction(
            attempt.original_prompt.clone(),
            attempt.failing_program.clone(),
            attempt.failure_message.clone(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionSuccess {
    pub artifact: BinaryArtifact,
    pub program: Program,
    pub attempts: u32,
}

/// The loop gave up. Carries the last failure, never a stale artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {reason}")]
pub struct TerminalFailure {
    pub attempts: u32,
    pub reason: PipelineError,
    pub last_program: Option<Program>,
}

impl TerminalFailure {
    pub fn category(&self) -> FailureCategory {
        self.reason.category()
    }
}

/// Receives every state transition of a correction run.
pub trait CorrectionObserver: Send + Sync {
    fn on_transition(&self, attempt_number: u32, state: &CorrectionState);
}

impl<F> CorrectionObserver for F
where
    F: Fn(u32, &CorrectionState) + Send + Sync,
{
    fn on_transition(&self, attempt_number: u32, state: &CorrectionState) {
        self(attempt_number, state)
    }
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl CorrectionObserver for NoopObserver {
    fn on_transition(&self, _: u32, _: &CorrectionState) {}
}
