pub mod geometry;
pub mod kernel;
pub mod script;
pub mod capabilities;
pub mod program;
pub mod security;
pub mod executor;
pub mod reducer;
pub mod mesh;
pub mod pipeline;
pub mod collaborator;
pub mod correction;
pub mod scheduler;

pub use executor::{ExecutionBudget, ExecutionOutcome, Executor, SolidOrCollection};
pub use mesh::{BinaryArtifact, MeshTriangle};
pub use pipeline::{compile, FailureCategory, Pipeline, PipelineError};
pub use program::Program;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
