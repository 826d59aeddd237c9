use async_trait::async_trait;
use partgen_core::collaborator::{
    CollaboratorError, GenerationCollaborator, GenerationRequest, Prompt, RetryConfig,
    RetryingCollaborator,
};
use partgen_core::correction::{CorrectionLoop, CorrectionState, RetryPolicy};
use partgen_core::scheduler::{ModelId, ModelScheduler, RunEvent, SchedulerConfig};
use partgen_core::{ExecutionBudget, FailureCategory, Pipeline, Program};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

const CUBE: &str = "const main = () => primitives.cube({ size: 10 });";
const SPHERE: &str = "const main = () => primitives.sphere({ radius: 5, segments: 12 });";
const BROKEN: &str = "function main() { return primitives.cube({ size: -1 }); }";

fn scheduler() -> ModelScheduler {
    ModelScheduler::new(
        Pipeline::default(),
        SchedulerConfig {
            debounce: Duration::from_millis(50),
            ..SchedulerConfig::default()
        },
    )
}

async fn next_event(rx: &mut Receiver<RunEvent>) -> RunEvent {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

/// Skips events until one that ends a run.
async fn next_result(rx: &mut Receiver<RunEvent>) -> RunEvent {
    loop {
        let event = next_event(rx).await;
        if matches!(event, RunEvent::ArtifactUpdate { .. } | RunEvent::ErrorUpdate { .. }) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_submission_updates_display() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();
    let model = ModelId::new();

    let handle = scheduler.submit(model, Program::new(CUBE)).await;
    let started = next_event(&mut rx).await;
    assert!(matches!(started, RunEvent::RunStarted { run_id, .. } if run_id == handle.run_id));

    let RunEvent::ArtifactUpdate { triangles, run_id, .. } = next_result(&mut rx).await else {
        panic!("expected an artifact");
    };
    assert_eq!(triangles, 12);
    assert_eq!(run_id, handle.run_id);

    let slot = scheduler.display(model).await.unwrap();
    assert_eq!(slot.run_id, Some(handle.run_id));
    assert_eq!(slot.artifact.unwrap().triangle_count(), 12);
    assert!(slot.last_error.is_none());
    assert!(!scheduler.is_running(model).await);
}

#[tokio::test]
async fn test_rapid_edits_are_coalesced() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();
    let model = ModelId::new();

    let first = scheduler.submit(model, Program::new(CUBE)).await;
    let second = scheduler.submit(model, Program::new(SPHERE)).await;
    assert!(first.cancel.is_cancelled());
    assert!(!second.cancel.is_cancelled());

    let started = next_event(&mut rx).await;
    assert_eq!(started.run_id(), second.run_id);
    let finished = next_result(&mut rx).await;
    assert_eq!(finished.run_id(), second.run_id);

    let slot = scheduler.display(model).await.unwrap();
    assert_eq!(slot.program.unwrap().as_str(), SPHERE);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_failure_keeps_previous_artifact() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();
    let model = ModelId::new();

    let good = scheduler.submit(model, Program::new(CUBE)).await;
    next_result(&mut rx).await;

    scheduler.submit(model, Program::new(BROKEN)).await;
    let RunEvent::ErrorUpdate { category, message, .. } = next_result(&mut rx).await else {
        panic!("expected an error");
    };
    assert_eq!(category, FailureCategory::RuntimeFailed);
    assert!(message.contains("size"));

    let slot = scheduler.display(model).await.unwrap();
    assert_eq!(slot.run_id, Some(good.run_id));
    assert!(slot.artifact.is_some());
    assert_eq!(slot.last_error.unwrap().category, FailureCategory::RuntimeFailed);
}

#[tokio::test]
async fn test_cancelled_run_never_starts() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();
    let model = ModelId::new();

    let handle = scheduler.submit(model, Program::new(CUBE)).await;
    assert!(scheduler.cancel(model).await);
    assert!(handle.cancel.is_cancelled());

    let waited = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(waited.is_err(), "no event expected");
    assert!(scheduler.display(model).await.unwrap().artifact.is_none());
}

#[tokio::test]
async fn test_new_submission_supersedes_running_job() {
    let pipeline = Pipeline::standard(ExecutionBudget {
        max_steps: u64::MAX,
        ..ExecutionBudget::default()
    });
    let scheduler = ModelScheduler::new(
        pipeline,
        SchedulerConfig {
            debounce: Duration::from_millis(50),
            ..SchedulerConfig::default()
        },
    );
    let mut rx = scheduler.subscribe();
    let model = ModelId::new();

    let spinning = scheduler
        .submit(model, Program::new("function main() { for (;;) {} }"))
        .await;
    let started = next_event(&mut rx).await;
    assert!(matches!(started, RunEvent::RunStarted { .. }));
    assert_eq!(started.run_id(), spinning.run_id);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.is_running(model).await);

    let cube = scheduler.submit(model, Program::new(CUBE)).await;
    assert!(spinning.cancel.is_cancelled());

    let RunEvent::ArtifactUpdate { run_id, .. } = next_result(&mut rx).await else {
        panic!("expected the newer run's artifact");
    };
    assert_eq!(run_id, cube.run_id);

    let late = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(late.is_err(), "superseded run must stay silent");
    assert_eq!(scheduler.display(model).await.unwrap().run_id, Some(cube.run_id));
}

#[tokio::test]
async fn test_models_are_independent() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();
    let a = ModelId::new();
    let b = ModelId::new();

    scheduler.submit(a, Program::new(CUBE)).await;
    scheduler.submit(b, Program::new(SPHERE)).await;

    let mut finished = Vec::new();
    while finished.len() < 2 {
        finished.push(next_result(&mut rx).await.model_id());
    }
    assert!(finished.contains(&a) && finished.contains(&b));
}

#[tokio::test]
async fn test_model_table_stays_bounded() {
    let scheduler = ModelScheduler::new(
        Pipeline::default(),
        SchedulerConfig {
            debounce: Duration::from_secs(60),
            max_models: 3,
            ..SchedulerConfig::default()
        },
    );
    let models: Vec<ModelId> = (0..5).map(|_| ModelId::new()).collect();
    let mut handles = Vec::new();
    for model in &models {
        handles.push(scheduler.submit(*model, Program::new(CUBE)).await);
    }

    assert_eq!(scheduler.model_count().await, 3);
    assert!(scheduler.display(models[0]).await.is_none());
    assert!(scheduler.display(models[1]).await.is_none());
    assert!(handles[0].cancel.is_cancelled());
    assert!(handles[1].cancel.is_cancelled());
    assert!(!handles[4].cancel.is_cancelled());

    // touching an existing model refreshes it instead of growing the table
    scheduler.submit(models[2], Program::new(SPHERE)).await;
    scheduler.submit(ModelId::new(), Program::new(CUBE)).await;
    assert_eq!(scheduler.model_count().await, 3);
    assert!(scheduler.display(models[2]).await.is_some());
    assert!(scheduler.display(models[3]).await.is_none());
}

#[tokio::test]
async fn test_removed_model_is_forgotten() {
    let scheduler = scheduler();
    let model = ModelId::new();
    let handle = scheduler.submit(model, Program::new(CUBE)).await;

    assert!(scheduler.remove(model).await);
    assert!(handle.cancel.is_cancelled());
    assert!(scheduler.display(model).await.is_none());
    assert!(!scheduler.remove(model).await);
    assert_eq!(scheduler.model_count().await, 0);
}

struct OneShot;

#[async_trait]
impl GenerationCollaborator for OneShot {
    fn name(&self) -> &str {
        "one-shot"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        if request.is_correction() {
            Ok(format!("```javascript\n{}\n```", CUBE))
        } else {
            Ok(BROKEN.to_string())
        }
    }
}

#[tokio::test]
async fn test_generation_streams_states() {
    let scheduler = scheduler();
    let mut rx = scheduler.subscribe();
    let model = ModelId::new();
    let correction = Arc::new(CorrectionLoop::new(
        Pipeline::default(),
        RetryingCollaborator::new(Arc::new(OneShot), RetryConfig::default()),
        RetryPolicy::default(),
    ));

    let handle = scheduler
        .generate(model, Prompt::new("a 10mm cube").unwrap(), correction)
        .await;

    let mut states = Vec::new();
    let artifact = loop {
        match next_event(&mut rx).await {
            RunEvent::StateUpdate { attempt, state, .. } => states.push((attempt, state)),
            RunEvent::ArtifactUpdate { triangles, run_id, .. } => {
                assert_eq!(run_id, handle.run_id);
                break triangles;
            }
            RunEvent::ErrorUpdate { message, .. } => panic!("unexpected failure: {}", message),
            RunEvent::RunStarted { .. } => {}
        }
    };
    assert_eq!(artifact, 12);
    assert!(matches!(states.iter().find(|(n, _)| *n == 1).map(|(_, s)| s), Some(CorrectionState::Generated)));
    assert!(states
        .iter()
        .any(|(n, s)| *n == 1 && matches!(s, CorrectionState::Failed(_))));
    assert_eq!(states.last(), Some(&(2, CorrectionState::Succeeded)));

    let json = serde_json::to_value(RunEvent::StateUpdate {
        model_id: model,
        run_id: handle.run_id,
        attempt: 2,
        state: CorrectionState::Succeeded,
    })
    .unwrap();
    assert_eq!(json["type"], "STATE_UPDATE");
    assert_eq!(json["state"], "SUCCEEDED");
}
