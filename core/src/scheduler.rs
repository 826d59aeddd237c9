//! Per-model run scheduling.
//!
//! Each model has at most one live run. A new submission cancels the previous
//! run's token, compile submissions are debounced, and only the newest run may
//! write the model's display slot. A failed run records its error and leaves
//! the previously displayed artifact in place.

use crate::collaborator::Prompt;
use crate::correction::{CorrectionLoop, CorrectionObserver, CorrectionState, FailureReason};
use crate::mesh::BinaryArtifact;
use crate::pipeline::{FailureCategory, Pipeline, PipelineError};
use crate::program::Program;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub Uuid);

impl ModelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Quiet period before a compile submission starts running.
    pub debounce: Duration,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
    /// Models kept in memory; the least recently used one is evicted
    /// when a new model would exceed it.
    pub max_models: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            event_capacity: 64,
            max_models: 1024,
        }
    }
}

/// Handle to a submitted run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub model_id: ModelId,
    pub run_id: RunId,
    pub cancel: CancellationToken,
}

/// What a host currently shows for a model.
#[derive(Debug, Clone, Default)]
pub struct DisplaySlot {
    pub artifact: Option<BinaryArtifact>,
    pub program: Option<Program>,
    /// Run that produced `artifact`.
    pub run_id: Option<RunId>,
    pub last_error: Option<FailureReason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEvent {
    RunStarted {
        model_id: ModelId,
        run_id: RunId,
    },
    ArtifactUpdate {
        model_id: ModelId,
        run_id: RunId,
        triangles: u32,
        bytes: usize,
        #[serde(skip)]
        artifact: BinaryArtifact,
    },
    ErrorUpdate {
        model_id: ModelId,
        run_id: RunId,
        category: FailureCategory,
        message: String,
    },
    StateUpdate {
        model_id: ModelId,
        run_id: RunId,
        attempt: u32,
        #[serde(flatten)]
        state: CorrectionState,
    },
}

impl RunEvent {
    pub fn model_id(&self) -> ModelId {
        match self {
            RunEvent::RunStarted { model_id, .. }
            | RunEvent::ArtifactUpdate { model_id, .. }
            | RunEvent::ErrorUpdate { model_id, .. }
            | RunEvent::StateUpdate { model_id, .. } => *model_id,
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::ArtifactUpdate { run_id, .. }
            | RunEvent::ErrorUpdate { run_id, .. }
            | RunEvent::StateUpdate { run_id, .. } => *run_id,
        }
    }
}

#[derive(Default)]
struct ModelState {
    current: Option<(RunId, CancellationToken)>,
    slot: DisplaySlot,
    last_used: u64,
}

#[derive(Default)]
struct ModelTable {
    entries: HashMap<ModelId, ModelState>,
    clock: u64,
}

impl ModelTable {
    /// Returns the model's state, creating it and evicting the least
    /// recently used model when the table is full.
    fn touch(&mut self, model_id: ModelId, capacity: usize) -> &mut ModelState {
        self.clock += 1;
        if !self.entries.contains_key(&model_id) && self.entries.len() >= capacity.max(1) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, state)| state.last_used)
                .map(|(id, _)| *id);
            if let Some(evicted) = oldest.and_then(|id| self.remove(id).map(|state| (id, state))) {
                debug!(model_id = %evicted.0, "evicted least recently used model");
            }
        }
        let state = self.entries.entry(model_id).or_default();
        state.last_used = self.clock;
        state
    }

    /// Drops a model, cancelling its live run.
    fn remove(&mut self, model_id: ModelId) -> Option<ModelState> {
        let state = self.entries.remove(&model_id)?;
        if let Some((_, token)) = &state.current {
            token.cancel();
        }
        Some(state)
    }
}

struct Inner {
    pipeline: Pipeline,
    config: SchedulerConfig,
    models: Mutex<ModelTable>,
    events: broadcast::Sender<RunEvent>,
}

impl Inner {
    fn emit(&self, event: RunEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Registers a new run, cancelling whatever was live for the model.
    async fn begin(&self, model_id: ModelId) -> RunHandle {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let mut models = self.models.lock().await;
        let state = models.touch(model_id, self.config.max_models);
        if let Some((previous, token)) = state.current.replace((run_id, cancel.clone())) {
            debug!(%model_id, %previous, "superseding previous run");
            token.cancel();
        }
        RunHandle {
            model_id,
            run_id,
            cancel,
        }
    }

    /// Writes a finished run into the display slot if it is still current.
    async fn commit(&self, handle: &RunHandle, result: Result<(BinaryArtifact, Program), PipelineError>) {
        let mut models = self.models.lock().await;
        let Some(state) = models.entries.get_mut(&handle.model_id) else {
            return;
        };
        let is_current = matches!(&state.current, Some((id, _)) if *id == handle.run_id);
        if !is_current || handle.cancel.is_cancelled() {
            debug!(model_id = %handle.model_id, run_id = %handle.run_id, "discarding superseded result");
            return;
        }
        state.current = None;

        match result {
            Ok((artifact, program)) => {
                info!(model_id = %handle.model_id, run_id = %handle.run_id, triangles = artifact.triangle_count(), "display updated");
                state.slot.artifact = Some(artifact.clone());
                state.slot.program = Some(program);
                state.slot.run_id = Some(handle.run_id);
                state.slot.last_error = None;
                self.emit(RunEvent::ArtifactUpdate {
                    model_id: handle.model_id,
                    run_id: handle.run_id,
                    triangles: artifact.triangle_count(),
                    bytes: artifact.len(),
                    artifact,
                });
            }
            Err(PipelineError::Cancelled) => {}
            Err(error) => {
                warn!(model_id = %handle.model_id, run_id = %handle.run_id, %error, "run failed");
                let reason = FailureReason::from(&error);
                state.slot.last_error = Some(reason.clone());
                self.emit(RunEvent::ErrorUpdate {
                    model_id: handle.model_id,
                    run_id: handle.run_id,
                    category: reason.category,
                    message: reason.message,
                });
            }
        }
    }
}

/// Forwards correction transitions as [`RunEvent::StateUpdate`].
struct EventObserver {
    inner: Arc<Inner>,
    model_id: ModelId,
    run_id: RunId,
}

impl CorrectionObserver for EventObserver {
    fn on_transition(&self, attempt_number: u32, state: &CorrectionState) {
        self.inner.emit(RunEvent::StateUpdate {
            model_id: self.model_id,
            run_id: self.run_id,
            attempt: attempt_number,
            state: state.clone(),
        });
    }
}

#[derive(Clone)]
pub struct ModelScheduler {
    inner: Arc<Inner>,
}

impl ModelScheduler {
    pub fn new(pipeline: Pipeline, config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                pipeline,
                config,
                models: Mutex::new(ModelTable::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Schedules a debounced compile of `program`. Must be called inside a
    /// tokio runtime.
    pub async fn submit(&self, model_id: ModelId, program: Program) -> RunHandle {
        let handle = self.inner.begin(model_id).await;
        let inner = self.inner.clone();
        let run = handle.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = run.cancel.cancelled() => {
                    debug!(%model_id, run_id = %run.run_id, "coalesced before start");
                    return;
                }
                _ = tokio::time::sleep(inner.config.debounce) => {}
            }
            inner.emit(RunEvent::RunStarted {
                model_id,
                run_id: run.run_id,
            });
            let result = inner
                .pipeline
                .run_detached(&program, &run.cancel)
                .await
                .map(|artifact| (artifact, program));
            inner.commit(&run, result).await;
        });

        handle
    }

    /// Generates a program from `prompt` and corrects it in the background.
    pub async fn generate(
        &self,
        model_id: ModelId,
        prompt: Prompt,
        correction: Arc<CorrectionLoop>,
    ) -> RunHandle {
        let handle = self.inner.begin(model_id).await;
        let inner = self.inner.clone();
        let run = handle.clone();

        tokio::spawn(async move {
            inner.emit(RunEvent::RunStarted {
                model_id,
                run_id: run.run_id,
            });
            let observer = EventObserver {
                inner: inner.clone(),
                model_id,
                run_id: run.run_id,
            };
            let result = correction
                .generate(&prompt, &observer, &run.cancel)
                .await
                .map(|success| (success.artifact, success.program))
                .map_err(|failure| failure.reason);
            inner.commit(&run, result).await;
        });

        handle
    }

    /// Cancels the live run of a model, if any.
    pub async fn cancel(&self, model_id: ModelId) -> bool {
        let mut models = self.inner.models.lock().await;
        match models
            .entries
            .get_mut(&model_id)
            .and_then(|state| state.current.take())
        {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets a model, cancelling its live run.
    pub async fn remove(&self, model_id: ModelId) -> bool {
        let mut models = self.inner.models.lock().await;
        models.remove(model_id).is_some()
    }

    /// Number of models currently held.
    pub async fn model_count(&self) -> usize {
        self.inner.models.lock().await.entries.len()
    }

    pub async fn display(&self, model_id: ModelId) -> Option<DisplaySlot> {
        let models = self.inner.models.lock().await;
        models.entries.get(&model_id).map(|state| state.slot.clone())
    }

    pub async fn is_running(&self, model_id: ModelId) -> bool {
        let models = self.inner.models.lock().await;
        models
            .entries
            .get(&model_id)
            .map(|state| state.current.is_some())
            .unwrap_or(false)
    }
}
