pub mod evaluate;
pub mod health;
pub mod providers;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/providers", get(providers::handle_providers))
        .route("/api/v1/evaluate", post(evaluate::handle_evaluate))
        .with_state(state)
}
