mod config;
mod gemini;
mod rate_limit;
mod routes;

use config::Settings;
use gemini::GeminiCollaborator;
use partgen_core::collaborator::RetryingCollaborator;
use partgen_core::correction::CorrectionLoop;
use partgen_core::scheduler::ModelScheduler;
use partgen_core::Pipeline;
use routes::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn build_state(settings: &Settings) -> AppState {
    let pipeline = Pipeline::standard(settings.pipeline.budget());
    let scheduler = ModelScheduler::new(pipeline.clone(), settings.pipeline.scheduler());

    let correction = if settings.generation.is_enabled() {
        match GeminiCollaborator::new(settings.generation.clone()) {
            Ok(gemini) => {
                info!(model = %settings.generation.model, "generation service enabled");
                let collaborator =
                    RetryingCollaborator::new(Arc::new(gemini), settings.generation.retry());
                Some(Arc::new(CorrectionLoop::new(
                    pipeline,
                    collaborator,
                    settings.pipeline.retry_policy(),
                )))
            }
            Err(e) => {
                warn!("generation service disabled: {}", e);
                None
            }
        }
    } else {
        info!("no GEMINI_API_KEY, generation endpoints disabled");
        None
    };

    AppState {
        scheduler,
        correction,
        generation_limit: settings.generation.rate_limiter(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(settings).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}

async fn serve(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = settings.server.addr()?;
    let app = routes::router(Arc::new(build_state(&settings)));

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
