//! Program text to binary artifact: gate, executor, reducer, encoder.

use crate::capabilities::CapabilitySet;
use crate::executor::{ExecutionBudget, ExecutionOutcome, Executor};
use crate::geometry::Solid;
use crate::kernel::{default_kernel, GeometryKernel};
use crate::mesh::{self, BinaryArtifact, EncodingError};
use crate::program::{Program, ValidatedProgram};
use crate::reducer::{reduce, ReductionError};
use crate::security::{self, SecurityRejection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Extra time past the budget before the host stops waiting for a worker.
const ABANDON_GRACE: Duration = Duration::from_secs(2);

/// Machine-checkable failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    SecurityRejected,
    RuntimeFailed,
    Timeout,
    EncodingFailed,
    CollaboratorUnavailable,
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("{0}")]
    SecurityRejected(#[from] SecurityRejection),

    #[error("Execution error: {0}")]
    RuntimeFailed(String),

    #[error("Execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Failed to export STL: {0}")]
    EncodingFailed(#[from] EncodingError),

    #[error("Generation service unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Run superseded by a newer request")]
    Cancelled,
}

impl PipelineError {
    pub fn category(&self) -> FailureCategory {
        match self {
            PipelineError::SecurityRejected(_) => FailureCategory::SecurityRejected,
            PipelineError::RuntimeFailed(_) => FailureCategory::RuntimeFailed,
            PipelineError::Timeout(_) => FailureCategory::Timeout,
            PipelineError::EncodingFailed(_) => FailureCategory::EncodingFailed,
            PipelineError::CollaboratorUnavailable(_) => FailureCategory::CollaboratorUnavailable,
            PipelineError::Cancelled => FailureCategory::Cancelled,
        }
    }
}

impl From<ReductionError> for PipelineError {
    fn from(e: ReductionError) -> Self {
        PipelineError::RuntimeFailed(e.to_string())
    }
}

/// The compile pipeline with a fixed capability set, kernel and budget.
#[derive(Clone)]
pub struct Pipeline {
    executor: Executor,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard(ExecutionBudget::default())
    }
}

impl Pipeline {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    /// Standard capabilities on the default kernel.
    pub fn standard(budget: ExecutionBudget) -> Self {
        Self::with_kernel(Arc::new(default_kernel()), budget)
    }

    pub fn with_kernel(kernel: Arc<dyn GeometryKernel>, budget: ExecutionBudget) -> Self {
        Self::new(Executor::new(CapabilitySet::standard(), kernel, budget))
    }

    pub fn budget(&self) -> &ExecutionBudget {
        self.executor.budget()
    }

    /// Security gate.
    pub fn admit(&self, program: &Program) -> Result<ValidatedProgram, PipelineError> {
        Ok(security::validate(program.clone())?)
    }

    /// Runs an admitted program and reduces its result to one solid.
    /// Blocks the calling thread.
    pub fn solidify(
        &self,
        program: &ValidatedProgram,
        cancel: &CancellationToken,
    ) -> Result<Solid, PipelineError> {
        let value = match self.executor.execute(program, cancel) {
            ExecutionOutcome::Success(value) => value,
            ExecutionOutcome::SecurityRejected(reason) => return Err(reason.into()),
            ExecutionOutcome::RuntimeFailed(message) => {
                return Err(PipelineError::RuntimeFailed(message))
            }
            ExecutionOutcome::Timeout => return Err(PipelineError::Timeout(self.budget().timeout)),
            ExecutionOutcome::Cancelled => return Err(PipelineError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(reduce(value, self.executor.kernel().as_ref())?)
    }

    /// [`Pipeline::solidify`] on the blocking pool.
    ///
    /// A worker still running after the budget plus a grace period is
    /// abandoned: its token is cancelled and its eventual result discarded.
    pub async fn solidify_detached(
        &self,
        program: ValidatedProgram,
        cancel: &CancellationToken,
    ) -> Result<Solid, PipelineError> {
        let run_token = cancel.child_token();
        let worker_token = run_token.clone();
        let pipeline = self.clone();
        let handle = tokio::task::spawn_blocking(move || pipeline.solidify(&program, &worker_token));

        let limit = self.budget().timeout.saturating_add(ABANDON_GRACE);
        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(PipelineError::RuntimeFailed(format!(
                "worker task failed: {}",
                join
            ))),
            Err(_) => {
                run_token.cancel();
                warn!(limit_ms = limit.as_millis() as u64, "abandoned unresponsive worker");
                Err(PipelineError::Timeout(self.budget().timeout))
            }
        }
    }

    pub fn encode(&self, solid: &Solid) -> Result<BinaryArtifact, PipelineError> {
        Ok(mesh::encode(solid)?)
    }

    /// Whole pipeline on the calling thread.
    #[instrument(skip_all, fields(chars = program.char_count()))]
    pub fn run(
        &self,
        program: &Program,
        cancel: &CancellationToken,
    ) -> Result<BinaryArtifact, PipelineError> {
        let validated = self.admit(program)?;
        let solid = self.solidify(&validated, cancel)?;
        let artifact = self.encode(&solid)?;
        info!(
            triangles = artifact.triangle_count(),
            bytes = artifact.len(),
            "program compiled"
        );
        Ok(artifact)
    }

    /// Whole pipeline with execution on the blocking pool.
    #[instrument(skip_all, fields(chars = program.char_count()))]
    pub async fn run_detached(
        &self,
        program: &Program,
        cancel: &CancellationToken,
    ) -> Result<BinaryArtifact, PipelineError> {
        let validated = self.admit(program)?;
        let solid = self.solidify_detached(validated, cancel).await?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let artifact = self.encode(&solid)?;
        info!(
            triangles = artifact.triangle_count(),
            bytes = artifact.len(),
            "program compiled"
        );
        Ok(artifact)
    }
}

/// Compiles program text with the standard capabilities and default kernel.
pub fn compile(
    program_text: &str,
    budget: &ExecutionBudget,
    cancel: &CancellationToken,
) -> Result<BinaryArtifact, PipelineError> {
    Pipeline::standard(budget.clone()).run(&Program::new(program_text), cancel)
}
