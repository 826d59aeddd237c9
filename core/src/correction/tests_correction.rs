use super::*;
use crate::collaborator::{
    CollaboratorError, GenerationCollaborator, GenerationRequest, Prompt, RetryConfig,
    RetryingCollaborator,
};
use crate::pipeline::FailureCategory;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GOOD: &str = "const main = () => {\n  return primitives.cube({ size: 10 });\n};";
const TYPO: &str = "const main = () => {\n  return primitives.cub({ size: 10 });\n};";
const NETWORK: &str = "function main() {\n  fetch('http://x');\n  return primitives.cube({ size: 1 });\n}";

fn cube_prompt() -> Prompt {
    Prompt::new("a cube").unwrap()
}

struct Scripted {
    replies: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Scripted {
    fn new(replies: Vec<Result<&str, CollaboratorError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationCollaborator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CollaboratorError::ServiceUnavailable("script exhausted".into())))
    }
}

#[derive(Default)]
struct Recorder {
    transitions: Mutex<Vec<(u32, CorrectionState)>>,
}

impl CorrectionObserver for Recorder {
    fn on_transition(&self, attempt_number: u32, state: &CorrectionState) {
        self.transitions.lock().unwrap().push((attempt_number, state.clone()));
    }
}

impl Recorder {
    fn states_of(&self, attempt: u32) -> Vec<CorrectionState> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == attempt)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

fn correction_loop(collaborator: Arc<Scripted>) -> CorrectionLoop {
    let retry = RetryConfig {
        max_attempts: 2,
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    };
    CorrectionLoop::new(
        Pipeline::default(),
        RetryingCollaborator::new(collaborator, retry),
        RetryPolicy::default(),
    )
}

#[tokio::test]
async fn test_first_program_succeeds() {
    let collaborator = Scripted::new(vec![Ok(GOOD)]);
    let recorder = Recorder::default();
    let success = correction_loop(collaborator.clone())
        .generate(&cube_prompt(), &recorder, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(success.attempts, 1);
    assert_eq!(success.artifact.triangle_count(), 12);
    assert_eq!(success.program.as_str(), GOOD);
    assert_eq!(
        recorder.states_of(1),
        vec![
            CorrectionState::Generated,
            CorrectionState::Validating,
            CorrectionState::Executing,
            CorrectionState::Encoding,
            CorrectionState::Succeeded,
        ]
    );
    assert_eq!(collaborator.requests().len(), 1);
}

#[tokio::test]
async fn test_runtime_failure_is_corrected() {
    let collaborator = Scripted::new(vec![Ok(TYPO), Ok(GOOD)]);
    let recorder = Recorder::default();
    let success = correction_loop(collaborator.clone())
        .generate(&cube_prompt(), &recorder, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(success.attempts, 2);
    let requests = collaborator.requests();
    assert_eq!(requests.len(), 2);
    let correction = &requests[1];
    assert_eq!(correction.natural_language_spec, "a cube");
    assert_eq!(correction.prior_program.as_ref().map(|p| p.as_str()), Some(TYPO));
    assert!(correction.prior_error.as_deref().unwrap_or("").contains("is not a function"));

    let first = recorder.states_of(1);
    let CorrectionState::Failed(reason) = first.last().unwrap() else {
        panic!("attempt 1 should fail");
    };
    assert_eq!(reason.category, FailureCategory::RuntimeFailed);
    assert_eq!(recorder.states_of(2).last(), Some(&CorrectionState::Succeeded));
}

#[tokio::test]
async fn test_security_rejection_is_corrected() {
    let collaborator = Scripted::new(vec![Ok(NETWORK), Ok(GOOD)]);
    let recorder = Recorder::default();
    let success = correction_loop(collaborator)
        .generate(&cube_prompt(), &recorder, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(success.attempts, 2);

    let first = recorder.states_of(1);
    assert!(!first.contains(&CorrectionState::Executing));
    assert!(matches!(
        first.last(),
        Some(CorrectionState::Failed(r)) if r.category == FailureCategory::SecurityRejected
    ));
}

#[tokio::test]
async fn test_ceiling_ends_in_terminal_failure() {
    let collaborator = Scripted::new(vec![Ok(TYPO), Ok(NETWORK), Ok(GOOD)]);
    let recorder = Recorder::default();
    let failure = correction_loop(collaborator.clone())
        .generate(&cube_prompt(), &recorder, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.category(), FailureCategory::SecurityRejected);
    assert_eq!(failure.last_program.as_ref().map(|p| p.as_str()), Some(NETWORK));
    // no request beyond the ceiling
    assert_eq!(collaborator.requests().len(), 2);
    assert!(recorder.states_of(3).is_empty());
}

#[tokio::test]
async fn test_identical_correction_is_not_executed() {
    let collaborator = Scripted::new(vec![Ok(TYPO), Ok(TYPO)]);
    let recorder = Recorder::default();
    let failure = correction_loop(collaborator)
        .generate(&cube_prompt(), &recorder, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.category(), FailureCategory::RuntimeFailed);
    let second = recorder.states_of(2);
    assert_eq!(second.len(), 2);
    assert_eq!(second[0], CorrectionState::Generated);
    assert!(matches!(second[1], CorrectionState::Failed(_)));
}

#[tokio::test]
async fn test_collaborator_outage_during_correction() {
    let collaborator = Scripted::new(vec![Ok(TYPO), Err(CollaboratorError::Auth("revoked".into()))]);
    let failure = correction_loop(collaborator)
        .generate(&cube_prompt(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.category(), FailureCategory::CollaboratorUnavailable);
}

#[tokio::test]
async fn test_initial_generation_outage() {
    let collaborator = Scripted::new(vec![
        Err(CollaboratorError::Transport("reset".into())),
        Err(CollaboratorError::Transport("reset".into())),
    ]);
    let failure = correction_loop(collaborator.clone())
        .generate(&cube_prompt(), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(failure.category(), FailureCategory::CollaboratorUnavailable);
    assert!(failure.last_program.is_none());
    assert_eq!(collaborator.requests().len(), 2);
}

#[tokio::test]
async fn test_repair_starts_from_given_program() {
    let collaborator = Scripted::new(vec![Ok(GOOD)]);
    let success = correction_loop(collaborator.clone())
        .repair("a cube", Program::new(TYPO), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(success.attempts, 2);
    assert_eq!(collaborator.requests().len(), 1);
    assert!(collaborator.requests()[0].is_correction());
}

#[tokio::test]
async fn test_cancelled_run_is_not_corrected() {
    let collaborator = Scripted::new(vec![Ok(GOOD)]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let failure = correction_loop(collaborator.clone())
        .repair("a cube", Program::new(GOOD), &NoopObserver, &cancel)
        .await
        .unwrap_err();
    assert_eq!(failure.category(), FailureCategory::Cancelled);
    assert!(collaborator.requests().is_empty());
}
