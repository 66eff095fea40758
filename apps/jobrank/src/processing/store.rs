//! Narrow query interface over the `job_listings` table.
//!
//! The scraper owns the table; this module only reads postings and writes scores back.
//! A row with `last_scored_at IS NULL` has never been scored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{Job, RankedJob};

/// Upper bound on candidates fetched per pass.
pub const BATCH_LIMIT: i64 = 1000;

const JOB_COLUMNS: &str = r#"
    id,
    COALESCE(title, '') AS title,
    COALESCE(company, '') AS company,
    COALESCE(location, '') AS location,
    COALESCE(description, '') AS description,
    COALESCE(date, '') AS date,
    applicants_count,
    company_size_score
"#;

/// The queries a scoring pass needs. `PgJobStore` is the production implementation.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Ids of jobs that have never been scored, oldest first.
    async fn job_ids_for_scoring(&self, limit: i64) -> Result<Vec<i64>>;

    /// Ids of scored jobs at or above `min_score` that none of `model_tags` has
    /// scored yet, best first.
    async fn job_ids_for_rescoring(
        &self,
        limit: i64,
        min_score: i32,
        model_tags: &[String],
    ) -> Result<Vec<i64>>;

    async fn get_job_by_id(&self, id: i64) -> Result<Option<Job>>;

    /// Writes every score field, the rank and the model tag, and stamps `last_scored_at`.
    async fn update_job_scores(&self, ranked: &RankedJob) -> Result<()>;
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn job_ids_for_scoring(&self, limit: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM job_listings
            WHERE last_scored_at IS NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch job ids for scoring")
    }

    async fn job_ids_for_rescoring(
        &self,
        limit: i64,
        min_score: i32,
        model_tags: &[String],
    ) -> Result<Vec<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM job_listings
            WHERE last_scored_at IS NOT NULL
              AND preliminary_score >= $2
              AND (scoring_model IS NULL OR NOT (scoring_model = ANY($3)))
            ORDER BY preliminary_score DESC, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(min_score)
        .bind(model_tags.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch job ids for rescoring")
    }

    async fn get_job_by_id(&self, id: i64) -> Result<Option<Job>> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM job_listings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load job {id}"))
    }

    async fn update_job_scores(&self, ranked: &RankedJob) -> Result<()> {
        let score = &ranked.score;
        sqlx::query(
            r#"
            UPDATE job_listings SET
                preliminary_score = $1,
                skills_match = $2,
                experience_gap = $3,
                model_fit_score = $4,
                success_probability = $5,
                role_complexity = $6,
                effort_days_to_fit = $7,
                critical_skill_mismatch_penalty = $8,
                reasoning = $9,
                areas_for_development = $10,
                query_token_count = $11,
                response_token_count = $12,
                scoring_model = $13,
                last_scored_at = NOW()
            WHERE id = $14
            "#,
        )
        .bind(ranked.preliminary_score)
        .bind(i32::from(score.skills_match))
        .bind(i32::from(score.experience_gap))
        .bind(i32::from(score.model_fit_score))
        .bind(i32::from(score.success_probability))
        .bind(i32::from(score.role_complexity))
        .bind(i64::from(score.effort_days_to_fit))
        .bind(i32::from(score.critical_skill_mismatch_penalty))
        .bind(&score.reasoning)
        .bind(&score.areas_for_development)
        .bind(i64::from(score.query_token_count))
        .bind(i64::from(score.response_token_count))
        .bind(&ranked.scoring_model)
        .bind(ranked.job.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update scores for job {}", ranked.job.id))?;

        Ok(())
    }
}
