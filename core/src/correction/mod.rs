//! Correction loop.
//!
//! Every program runs through `Generated → Validating → Executing → Encoding
//! → Succeeded`. A failure in any state is reported as `Failed` and, while the
//! retry ceiling allows, turned into a correction request whose answer starts
//! the next attempt.

mod state;

#[cfg(test)]
mod tests_correction;

pub use state::*;

use crate::collaborator::{GenerationRequest, Prompt, RetryingCollaborator};
use crate::mesh::BinaryArtifact;
use crate::pipeline::{Pipeline, PipelineError};
use crate::program::Program;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct CorrectionLoop {
    pipeline: Pipeline,
    collaborator: RetryingCollaborator,
    policy: RetryPolicy,
}

impl CorrectionLoop {
    pub fn new(pipeline: Pipeline, collaborator: RetryingCollaborator, policy: RetryPolicy) -> Self {
        Self {
            pipeline,
            collaborator,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Asks the collaborator for a first program, then runs it through the loop.
    #[instrument(skip_all, fields(collaborator = self.collaborator.name()))]
    pub async fn generate(
        &self,
        prompt: &Prompt,
        observer: &dyn CorrectionObserver,
        cancel: &CancellationToken,
    ) -> Result<CorrectionSuccess, TerminalFailure> {
        let prompt = prompt.as_str();
        let request = GenerationRequest::initial(prompt);
        let program = match self.collaborator.request_program(&request).await {
            Ok(program) => program,
            Err(e) => {
                let reason = PipelineError::CollaboratorUnavailable(e.to_string());
                observer.on_transition(1, &CorrectionState::Failed((&reason).into()));
                return Err(TerminalFailure {
                    attempts: 1,
                    reason,
                    last_program: None,
                });
            }
        };
        self.repair(prompt, program, observer, cancel).await
    }

    /// Runs `program` as attempt 1, correcting failures up to the ceiling.
    #[instrument(skip_all, fields(ceiling = self.policy.retry_ceiling))]
    pub async fn repair(
        &self,
        prompt: &str,
        program: Program,
        observer: &dyn CorrectionObserver,
        cancel: &CancellationToken,
    ) -> Result<CorrectionSuccess, TerminalFailure> {
        let mut attempt_number = 1;
        let mut program = program;
        let mut repeated: Option<PipelineError> = None;

        loop {
            observer.on_transition(attempt_number, &CorrectionState::Generated);

            let result = match repeated.take() {
                Some(previous) => {
                    warn!(attempt_number, "correction is identical to the failing program");
                    Err(previous)
                }
                None => self.attempt(attempt_number, &program, observer, cancel).await,
            };

            let error = match result {
                Ok(artifact) => {
                    observer.on_transition(attempt_number, &CorrectionState::Succeeded);
                    info!(attempt_number, triangles = artifact.triangle_count(), "correction loop succeeded");
                    return Ok(CorrectionSuccess {
                        artifact,
                        program,
                        attempts: attempt_number,
                    });
                }
                Err(error) => error,
            };

            if !matches!(error, PipelineError::Cancelled) {
                observer.on_transition(attempt_number, &CorrectionState::Failed((&error).into()));
            }
            if matches!(error, PipelineError::Cancelled) || !self.policy.allows_another(attempt_number) {
                warn!(attempt_number, category = ?error.category(), "correction loop gave up");
                return Err(TerminalFailure {
                    attempts: attempt_number,
                    reason: error,
                    last_program: Some(program),
                });
            }

            let attempt = CorrectionAttempt {
                original_prompt: prompt.to_string(),
                failing_program: program.clone(),
                failure_message: error.to_string(),
                category: error.category(),
                attempt_number,
            };
            let request = GenerationRequest::from(&attempt);
            let corrected = match self.collaborator.request_program(&request).await {
                Ok(corrected) => corrected,
                Err(e) => {
                    let reason = PipelineError::CollaboratorUnavailable(e.to_string());
                    observer.on_transition(attempt_number, &CorrectionState::Failed((&reason).into()));
                    return Err(TerminalFailure {
                        attempts: attempt_number,
                        reason,
                        last_program: Some(program),
                    });
                }
            };

            if corrected == attempt.failing_program {
                repeated = Some(error);
            }
            program = corrected;
            attempt_number += 1;
        }
    }

    async fn attempt(
        &self,
        attempt_number: u32,
        program: &Program,
        observer: &dyn CorrectionObserver,
        cancel: &CancellationToken,
    ) -> Result<BinaryArtifact, PipelineError> {
        observer.on_transition(attempt_number, &CorrectionState::Validating);
        let validated = self.pipeline.admit(program)?;

        observer.on_transition(attempt_number, &CorrectionState::Executing);
        let solid = self.pipeline.solidify_detached(validated, cancel).await?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        observer.on_transition(attempt_number, &CorrectionState::Encoding);
        self.pipeline.encode(&solid)
    }
}
