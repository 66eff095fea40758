use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::Config;
use crate::evaluation::Evaluator;
use crate::llm_client::{ProviderManager, ProviderSet};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Same manager the background processor reports to.
    pub manager: Arc<ProviderManager>,
    pub providers: Arc<ProviderSet>,
    /// Scoring-model evaluator used by `POST /api/v1/evaluate`.
    pub evaluator: Arc<Evaluator>,
    /// Admission gate shared with the processor; bounds every in-flight evaluation.
    pub gate: Arc<Semaphore>,
}
