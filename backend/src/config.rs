//! Service settings: optional `config/default` and `config/local` files, then
//! `PARTGEN__*` environment variables.

use crate::rate_limit::SlidingWindowLimiter;
use partgen_core::collaborator::RetryConfig;
use partgen_core::correction::RetryPolicy;
use partgen_core::scheduler::SchedulerConfig;
use partgen_core::ExecutionBudget;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub pipeline: PipelineSettings,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerSettings {
    pub fn addr(&self) -> Result<SocketAddr, ValidationError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ValidationError::server(format!("invalid listen address: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_steps: u64,
    pub timeout_ms: u64,
    pub max_call_depth: usize,
    pub max_polygons: usize,
    pub max_alloc_bytes: usize,
    pub debounce_ms: u64,
    pub max_models: usize,
    pub retry_ceiling: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let budget = ExecutionBudget::default();
        Self {
            max_steps: budget.max_steps,
            timeout_ms: budget.timeout.as_millis() as u64,
            max_call_depth: budget.max_call_depth,
            max_polygons: budget.max_polygons,
            max_alloc_bytes: budget.max_alloc_bytes,
            debounce_ms: 100,
            max_models: SchedulerConfig::default().max_models,
            retry_ceiling: RetryPolicy::default().retry_ceiling,
        }
    }
}

impl PipelineSettings {
    pub fn budget(&self) -> ExecutionBudget {
        ExecutionBudget {
            max_steps: self.max_steps,
            timeout: Duration::from_millis(self.timeout_ms),
            max_call_depth: self.max_call_depth,
            max_polygons: self.max_polygons,
            max_alloc_bytes: self.max_alloc_bytes,
        }
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_models: self.max_models,
            ..SchedulerConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_ceiling: self.retry_ceiling,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Overridden by `GEMINI_API_KEY`.
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    /// Generation requests accepted per window, across all clients.
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 8192,
            timeout_secs: 60,
            max_attempts: 2,
            initial_backoff_ms: 1000,
            rate_limit_requests: 30,
            rate_limit_window_secs: 3600,
        }
    }
}

impl GenerationSettings {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            ..RetryConfig::default()
        }
    }

    pub fn rate_limiter(&self) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(
            self.rate_limit_requests,
            Duration::from_secs(self.rate_limit_window_secs),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Server configuration error: {message}")]
    Server { message: String },

    #[error("Pipeline configuration error: {message}")]
    Pipeline { message: String },

    #[error("Generation configuration error: {message}")]
    Generation { message: String },
}

impl ValidationError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl Settings {
    pub fn load() -> Result<Self, ConfigLoadError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("PARTGEN").separator("__"));

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            settings.generation.api_key = Some(key);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.addr()?;

        let p = &self.pipeline;
        if p.max_steps == 0 {
            return Err(ValidationError::pipeline("max_steps must be > 0"));
        }
        if p.timeout_ms == 0 {
            return Err(ValidationError::pipeline("timeout_ms must be > 0"));
        }
        if p.max_call_depth == 0 {
            return Err(ValidationError::pipeline("max_call_depth must be > 0"));
        }
        if p.max_alloc_bytes == 0 {
            return Err(ValidationError::pipeline("max_alloc_bytes must be > 0"));
        }
        if p.max_models == 0 {
            return Err(ValidationError::pipeline("max_models must be > 0"));
        }
        if p.retry_ceiling == 0 {
            return Err(ValidationError::pipeline("retry_ceiling must be >= 1"));
        }

        let g = &self.generation;
        if matches!(&g.api_key, Some(key) if key.trim().is_empty()) {
            return Err(ValidationError::generation("api_key is set but empty"));
        }
        if g.model.trim().is_empty() {
            return Err(ValidationError::generation("model must not be empty"));
        }
        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(ValidationError::generation("temperature must be within 0.0..=2.0"));
        }
        if g.max_attempts == 0 {
            return Err(ValidationError::generation("max_attempts must be >= 1"));
        }
        if g.rate_limit_requests == 0 || g.rate_limit_window_secs == 0 {
            return Err(ValidationError::generation(
                "rate_limit_requests and rate_limit_window_secs must be > 0",
            ));
        }
        Ok(())
    }
}
