//! Sandboxed executor.
//!
//! A validated program is parsed and run by the embedded interpreter on a
//! dedicated thread whose root scope is exactly the capability set. The
//! value `main` returns is classified here, at the boundary, and only plain
//! `Send` geometry leaves the worker.

use crate::capabilities::CapabilitySet;
use crate::geometry::Solid;
use crate::kernel::GeometryKernel;
use crate::program::ValidatedProgram;
use crate::script::value::lookup;
use crate::script::{parse_program, Interpreter, Limits, Meter, ScriptError, Value};
use crate::security::SecurityRejection;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Interpreter thread stack; deep ASTs recurse through the evaluator.
const INTERPRETER_STACK_BYTES: usize = 64 * 1024 * 1024;

pub const MISSING_MAIN: &str = "Code must define a main() function";
pub const NO_GEOMETRY: &str = "entry point produced no geometry";

/// Bounds on one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionBudget {
    pub max_steps: u64,
    pub timeout: Duration,
    pub max_call_depth: usize,
    pub max_polygons: usize,
    /// Bytes of script arrays and strings a run may allocate in total.
    pub max_alloc_bytes: usize,
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            timeout: Duration::from_secs(10),
            max_call_depth: 128,
            max_polygons: 2_000_000,
            max_alloc_bytes: 256 << 20,
        }
    }
}

impl ExecutionBudget {
    fn limits(&self, started: Instant) -> Limits {
        Limits {
            max_steps: self.max_steps,
            deadline: started.checked_add(self.timeout),
            max_call_depth: self.max_call_depth,
            max_polygons: self.max_polygons,
            max_alloc_bytes: self.max_alloc_bytes,
            ..Limits::default()
        }
    }
}

/// One entry of a returned array.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionItem {
    Solid(Solid),
    /// Anything that is not a solid, by script type name.
    Other(&'static str),
}

/// What `main` returned, decided once at the executor boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum SolidOrCollection {
    Solid(Solid),
    /// Nested arrays are flattened in order.
    Collection(Vec<CollectionItem>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(SolidOrCollection),
    SecurityRejected(SecurityRejection),
    RuntimeFailed(String),
    Timeout,
    /// The run's token was cancelled by a newer submission.
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}

/// Runs validated programs against a fixed capability set and kernel.
#[derive(Clone)]
pub struct Executor {
    capabilities: CapabilitySet,
    kernel: Arc<dyn GeometryKernel>,
    budget: ExecutionBudget,
}

impl Executor {
    pub fn new(
        capabilities: CapabilitySet,
        kernel: Arc<dyn GeometryKernel>,
        budget: ExecutionBudget,
    ) -> Self {
        Self {
            capabilities,
            kernel,
            budget,
        }
    }

    pub fn budget(&self) -> &ExecutionBudget {
        &self.budget
    }

    pub fn kernel(&self) -> &Arc<dyn GeometryKernel> {
        &self.kernel
    }

    /// Runs `program` to completion, blocking the caller.
    ///
    /// Panics inside the worker are caught and reported as runtime failures.
    #[instrument(skip_all, fields(chars = program.as_str().len(), kernel = self.kernel.name()))]
    pub fn execute(&self, program: &ValidatedProgram, cancel: &CancellationToken) -> ExecutionOutcome {
        let started = Instant::now();
        let outcome = thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name("partgen-script".into())
                .stack_size(INTERPRETER_STACK_BYTES)
                .spawn_scoped(scope, || {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        self.run_program(program, cancel, started)
                    }))
                });
            match spawned {
                Ok(handle) => match handle.join() {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(payload)) | Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        warn!(%message, "script worker panicked");
                        ExecutionOutcome::RuntimeFailed(format!("internal error: {}", message))
                    }
                },
                Err(e) => ExecutionOutcome::RuntimeFailed(format!(
                    "failed to start script worker: {}",
                    e
                )),
            }
        });
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, success = outcome.is_success(), "execution finished");
        outcome
    }

    fn run_program(
        &self,
        program: &ValidatedProgram,
        cancel: &CancellationToken,
        started: Instant,
    ) -> ExecutionOutcome {
        let ast = match parse_program(program.as_str()) {
            Ok(ast) => ast,
            Err(e) => return ExecutionOutcome::RuntimeFailed(e.to_string()),
        };

        let root = self.capabilities.install();
        let meter = Meter::new(self.budget.limits(started), cancel.clone());
        let mut interp = Interpreter::new(self.kernel.clone(), root, meter);

        let result = interp.run(&ast).and_then(|global| {
            let main = lookup(&global, "main").filter(Value::is_callable);
            match main {
                Some(main) => interp.call_value(&main, Vec::new()).map(Some),
                None => Ok(None),
            }
        });

        let outcome = match result {
            Ok(Some(value)) => classify(&value),
            Ok(None) => ExecutionOutcome::RuntimeFailed(MISSING_MAIN.to_string()),
            Err(e) => script_failure(e, interp.current_line()),
        };
        debug!(
            steps = interp.meter().steps(),
            polygons = interp.meter().polygons(),
            allocated = interp.meter().allocated(),
            "script run complete"
        );
        outcome
    }
}

fn script_failure(error: ScriptError, line: u32) -> ExecutionOutcome {
    if error.is_timeout() {
        return ExecutionOutcome::Timeout;
    }
    match error {
        ScriptError::Cancelled => ExecutionOutcome::Cancelled,
        ScriptError::Syntax { .. } => ExecutionOutcome::RuntimeFailed(error.to_string()),
        other if line > 0 => ExecutionOutcome::RuntimeFailed(format!("{} (line {})", other, line)),
        other => ExecutionOutcome::RuntimeFailed(other.to_string()),
    }
}

fn classify(value: &Value) -> ExecutionOutcome {
    match value {
        Value::Undefined | Value::Null => ExecutionOutcome::RuntimeFailed(NO_GEOMETRY.to_string()),
        Value::Solid(solid) => {
            ExecutionOutcome::Success(SolidOrCollection::Solid(solid.as_ref().clone()))
        }
        Value::Array(_) => {
            let mut items = Vec::new();
            flatten_into(value, &mut items);
            ExecutionOutcome::Success(SolidOrCollection::Collection(items))
        }
        Value::Shape(_) => ExecutionOutcome::RuntimeFailed(
            "entry point returned 2D geometry; extrude it into a solid".to_string(),
        ),
        other => ExecutionOutcome::RuntimeFailed(format!(
            "entry point returned {} instead of geometry",
            other.type_name()
        )),
    }
}

fn flatten_into(value: &Value, out: &mut Vec<CollectionItem>) {
    match value {
        Value::Array(items) => {
            for item in items.borrow().iter() {
                flatten_into(item, out);
            }
        }
        Value::Solid(solid) => out.push(CollectionItem::Solid(solid.as_ref().clone())),
        other => out.push(CollectionItem::Other(other.type_name())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
