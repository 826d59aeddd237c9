use axum::{
    body::Body,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use crate::rate_limit::{RateLimitResult, SlidingWindowLimiter};
use futures::{sink::SinkExt, stream::StreamExt};
use partgen_core::collaborator::{Prompt, PromptError};
use partgen_core::correction::CorrectionLoop;
use partgen_core::scheduler::{ModelId, ModelScheduler, RunEvent, RunHandle};
use partgen_core::Program;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Header carrying the last failure of a model, if any.
pub const LAST_ERROR_HEADER: &str = "x-partgen-last-error";

pub struct AppState {
    pub scheduler: ModelScheduler,
    /// Present when a generation service is configured.
    pub correction: Option<Arc<CorrectionLoop>>,
    pub generation_limit: SlidingWindowLimiter,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/models/:id/compile", post(compile))
        .route("/api/models/:id/generate", post(generate))
        .route("/api/models/:id/artifact.stl", get(artifact))
        .route("/api/models/:id", delete(remove_model))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no artifact for model {0}")]
    NoArtifact(ModelId),

    #[error("generation service is not configured")]
    GenerationDisabled,

    #[error("invalid prompt: {0}")]
    InvalidPrompt(#[from] PromptError),

    #[error("generation rate limit reached, retry in {}s", .0.as_secs().max(1))]
    RateLimited(Duration),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::NoArtifact(_) => "NO_ARTIFACT",
            ApiError::GenerationDisabled => "GENERATION_DISABLED",
            ApiError::InvalidPrompt(_) => "INVALID_PROMPT",
            ApiError::RateLimited(_) => "RATE_LIMITED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NoArtifact(_) => StatusCode::NOT_FOUND,
            ApiError::GenerationDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidPrompt(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        };
        let retry_after = match &self {
            ApiError::RateLimited(wait) => Some(wait.as_secs().max(1)),
            _ => None,
        };
        let mut response =
            (status, Json(json!({ "code": self.code(), "error": self.to_string() }))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[derive(Debug, Deserialize)]
pub struct CompileBody {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub model_id: ModelId,
    pub run_id: String,
}

impl From<&RunHandle> for Accepted {
    fn from(handle: &RunHandle) -> Self {
        Self {
            model_id: handle.model_id,
            run_id: handle.run_id.to_string(),
        }
    }
}

async fn root() -> &'static str {
    "partgen backend"
}

async fn compile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompileBody>,
) -> impl IntoResponse {
    let handle = state.scheduler.submit(ModelId(id), Program::new(body.code)).await;
    (StatusCode::ACCEPTED, Json(Accepted::from(&handle)))
}

/// Shared by the HTTP and websocket entry points.
async fn start_generation(
    state: &AppState,
    model_id: ModelId,
    raw_prompt: &str,
) -> Result<RunHandle, ApiError> {
    let correction = state.correction.clone().ok_or(ApiError::GenerationDisabled)?;
    let prompt = Prompt::new(raw_prompt)?;
    if let RateLimitResult::Limited { retry_after } = state.generation_limit.check().await {
        return Err(ApiError::RateLimited(retry_after));
    }
    Ok(state.scheduler.generate(model_id, prompt, correction).await)
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<GenerateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = start_generation(&state, ModelId(id), &body.prompt).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted::from(&handle))))
}

async fn remove_model(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    if state.scheduler.remove(ModelId(id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn artifact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let model_id = ModelId(id);
    let slot = state.scheduler.display(model_id).await.unwrap_or_default();
    let error_header = slot
        .last_error
        .as_ref()
        .and_then(|reason| HeaderValue::from_str(&header_safe(&reason.message)).ok());

    let Some(artifact) = slot.artifact else {
        let mut response = ApiError::NoArtifact(model_id).into_response();
        if let Some(value) = error_header {
            response.headers_mut().insert(LAST_ERROR_HEADER, value);
        }
        return Ok(response);
    };

    let mut response = Response::new(Body::from(artifact.bytes().to_vec()));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("model/stl"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("attachment; filename=\"model.stl\""),
    );
    if let Some(value) = error_header {
        headers.insert(LAST_ERROR_HEADER, value);
    }
    Ok(response)
}

/// Header values must be visible ASCII.
fn header_safe(message: &str) -> String {
    message
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '?' })
        .collect()
}

fn event_prefix(event: &RunEvent) -> &'static str {
    match event {
        RunEvent::RunStarted { .. } => "RUN_STARTED",
        RunEvent::ArtifactUpdate { .. } => "ARTIFACT_UPDATE",
        RunEvent::ErrorUpdate { .. } => "ERROR_UPDATE",
        RunEvent::StateUpdate { .. } => "STATE_UPDATE",
    }
}

/// Text frame for an event: `PREFIX:{json}`.
pub fn event_frame(event: &RunEvent) -> String {
    let body = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("{}:{}", event_prefix(event), body)
}

fn format_error(code: &str, message: &str) -> String {
    format!(
        "ERROR_UPDATE:{}",
        json!({ "code": code, "message": message, "severity": "error" })
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
struct CompileCmd {
    model_id: Uuid,
    code: String,
}

#[derive(Deserialize)]
struct GenerateCmd {
    model_id: Uuid,
    prompt: String,
}

#[derive(Deserialize)]
struct CancelCmd {
    model_id: Uuid,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("Client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.scheduler.subscribe();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else { break };
                let Message::Text(text) = msg else { continue };
                if let Some(reply) = handle_command(&state, &text).await {
                    if sender.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client fell behind, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if sender.send(Message::Text(event_frame(&event))).await.is_err() {
                    break;
                }
                if let RunEvent::ArtifactUpdate { artifact, .. } = &event {
                    if sender.send(Message::Binary(artifact.bytes().to_vec())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    info!("Client disconnected");
}

/// Text commands: `COMPILE:{..}`, `GENERATE:{..}`, `CANCEL:{..}`.
async fn handle_command(state: &AppState, text: &str) -> Option<String> {
    debug!("Received message: {}", text);
    if let Some(json_str) = text.strip_prefix("COMPILE:") {
        match serde_json::from_str::<CompileCmd>(json_str) {
            Ok(cmd) => {
                state
                    .scheduler
                    .submit(ModelId(cmd.model_id), Program::new(cmd.code))
                    .await;
                None
            }
            Err(e) => Some(format_error("BAD_COMMAND", &format!("invalid COMPILE: {}", e))),
        }
    } else if let Some(json_str) = text.strip_prefix("GENERATE:") {
        match serde_json::from_str::<GenerateCmd>(json_str) {
            Ok(cmd) => match start_generation(state, ModelId(cmd.model_id), &cmd.prompt).await {
                Ok(_) => None,
                Err(e) => Some(format_error(e.code(), &e.to_string())),
            },
            Err(e) => Some(format_error("BAD_COMMAND", &format!("invalid GENERATE: {}", e))),
        }
    } else if let Some(json_str) = text.strip_prefix("CANCEL:") {
        match serde_json::from_str::<CancelCmd>(json_str) {
            Ok(cmd) => {
                state.scheduler.cancel(ModelId(cmd.model_id)).await;
                None
            }
            Err(e) => Some(format_error("BAD_COMMAND", &format!("invalid CANCEL: {}", e))),
        }
    } else {
        warn!("Unknown command: {}", text);
        Some(format_error("UNKNOWN_COMMAND", "unknown command"))
    }
}
