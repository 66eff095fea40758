use axum::{extract::State, Json};
use serde::Serialize;

use crate::llm_client::provider_manager::ProviderStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProviderView {
    #[serde(flatten)]
    pub status: ProviderStatus,
    /// Requests per window the provider's rate limiter currently allows.
    pub current_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub mode: &'static str,
    pub secondary_credits: u32,
    pub providers: Vec<ProviderView>,
}

/// GET /api/v1/providers
/// Live selection state: failures, cooldowns and limits per provider.
pub async fn handle_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let limits = state.providers.limits();
    let providers = state
        .manager
        .status()
        .into_iter()
        .map(|status| ProviderView {
            current_limit: limits.get(&status.name).copied(),
            status,
        })
        .collect();

    Json(ProvidersResponse {
        mode: state.config.provider_mode.as_str(),
        secondary_credits: state.manager.secondary_credits(),
        providers,
    })
}
