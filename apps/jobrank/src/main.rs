mod config;
mod db;
mod errors;
mod evaluation;
mod llm_client;
mod models;
mod processing;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Semaphore;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::evaluation::{Evaluator, PromptBuilder, RetryPolicy};
use crate::llm_client::{http_client, ProviderManager, ProviderSet, REQUEST_TIMEOUT};
use crate::processing::store::PgJobStore;
use crate::processing::Processor;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting jobrank v{}", env!("CARGO_PKG_VERSION"));

    // Providers: one rate limiter per account, shared by scoring and rescoring clients
    let http = http_client(REQUEST_TIMEOUT)?;
    let providers = ProviderSet::from_config(&config, &http);
    if providers.is_empty() {
        bail!(
            "No AI keys found for provider mode '{}'",
            config.provider_mode.as_str()
        );
    }
    let manager = Arc::new(ProviderManager::new(providers.roles.clone()));

    let prompts = PromptBuilder::new(config.load_prompt_template()?)?;
    let scoring = Arc::new(Evaluator::new(
        manager.clone(),
        providers.scoring.clone(),
        prompts.clone(),
        RetryPolicy::default(),
    ));
    let rescoring = Arc::new(Evaluator::new(
        manager.clone(),
        providers.rescoring.clone(),
        prompts,
        RetryPolicy::default(),
    ));
    let rescoring_tags = providers
        .rescoring
        .iter()
        .map(|client| client.scoring_model())
        .collect();

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url, config.concurrency).await?;

    // One admission gate for background passes and HTTP evaluations alike
    let gate = Arc::new(Semaphore::new(config.concurrency.max(1)));

    let processor = Processor::new(
        Arc::new(PgJobStore::new(db)),
        scoring.clone(),
        rescoring,
        rescoring_tags,
        config.rescoring_min_score,
        gate.clone(),
        config.retry_cooldown,
    );
    let (recipe, endless) = (config.recipe, config.endless);
    let processor_task = tokio::spawn(async move {
        if let Err(e) = processor.run(recipe, endless).await {
            error!("Processor stopped: {e:#}");
        }
    });

    // Build app state
    let state = AppState {
        config: config.clone(),
        manager,
        providers: Arc::new(providers),
        evaluator: scoring,
        gate,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cancels outstanding evaluations; only calls that already resolved have reported.
    processor_task.abort();
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down");
}
