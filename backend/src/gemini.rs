//! Gemini `generateContent` client.

use crate::config::GenerationSettings;
use async_trait::async_trait;
use partgen_core::collaborator::{CollaboratorError, GenerationCollaborator, GenerationRequest};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

const SYSTEM_INSTRUCTION: &str = "\
You generate precise, parametric JSCAD code for 3D mechanical parts.
Recall standard dimensions for common parts (ISO/DIN screws, nuts, washers, bearings) and use realistic sizes when none are given.

AVAILABLE MODULES (pre-imported as globals):
- primitives: cuboid, cube, cylinder, sphere, roundedCuboid, roundedCylinder, torus, polyhedron, rectangle, circle, polygon
- booleans: union, subtract, intersect
- transforms: translate, rotate, scale, center
- extrusions: extrudeLinear, extrudeRotate
- hulls: hull, hullChain

OUTPUT:
- Only raw JavaScript, no markdown and no explanations
- Start with \"const main = () => {\" and end with \"};\"
- main() must return a geometry
- Dimensions in millimeters, parameters as camelCase constants at the top
- segments: 32 or more for smooth curves";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

pub struct GeminiCollaborator {
    client: Client,
    settings: GenerationSettings,
    api_key: String,
}

impl GeminiCollaborator {
    pub fn new(settings: GenerationSettings) -> Result<Self, CollaboratorError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| CollaboratorError::Auth("Gemini API key not configured".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            settings,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.model
        )
    }
}

fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> CollaboratorError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CollaboratorError::RateLimited {
            message: body,
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorError::Auth(body),
        s if s.is_server_error() => CollaboratorError::ServiceUnavailable(format!("{} - {}", s, body)),
        s => CollaboratorError::InvalidRequest(format!("{} - {}", s, body)),
    }
}

#[async_trait]
impl GenerationCollaborator for GeminiCollaborator {
    fn name(&self) -> &str {
        &self.settings.model
    }

    #[instrument(skip_all, fields(model = %self.settings.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CollaboratorError> {
        let prompt = request.prompt();
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION,
                }],
            },
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
                top_k: self.settings.top_k,
                max_output_tokens: self.settings.max_output_tokens,
            },
        };

        debug!(chars = prompt.len(), "sending generateContent request");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            error!(%status, "generateContent failed");
            return Err(status_error(status, text, retry_after));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::MalformedResponse(e.to_string()))?;
        parsed
            .text()
            .ok_or_else(|| CollaboratorError::MalformedResponse("response has no text".to_string()))
    }
}
