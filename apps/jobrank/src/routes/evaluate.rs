use anyhow::Context;
use axum::{extract::State, Json};
use chrono::Utc;
use tracing::info;

use crate::errors::AppError;
use crate::models::{Job, RankedJob};
use crate::processing::processor::rank_job;
use crate::state::AppState;

/// POST /api/v1/evaluate
/// Evaluates and ranks one job without persisting it.
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Json(job): Json<Job>,
) -> Result<Json<RankedJob>, AppError> {
    if job.description.trim().is_empty() {
        return Err(AppError::Validation(
            "Job description must not be empty".to_string(),
        ));
    }

    info!("Ad-hoc evaluation requested for job {}", job.id);
    let _permit = state
        .gate
        .clone()
        .acquire_owned()
        .await
        .context("Evaluation gate closed")?;
    let evaluation = state.evaluator.evaluate(&job).await?;
    let ranked = rank_job(
        job,
        evaluation.score,
        evaluation.scoring_model,
        Utc::now().date_naive(),
    );
    Ok(Json(ranked))
}
