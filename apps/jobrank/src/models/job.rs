use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::evaluation::ScoreRecord;

/// A scraped job posting as stored in `job_listings`. Read-only to the scoring core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    /// Posting date, `YYYY-MM-DD`.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub applicants_count: Option<i32>,
    /// Small-integer size bucket; 3–5 are mid-size companies.
    #[serde(default)]
    pub company_size_score: Option<i32>,
}

/// A job merged with its evaluation and final rank. Built fresh after each evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct RankedJob {
    #[serde(flatten)]
    pub job: Job,
    #[serde(flatten)]
    pub score: ScoreRecord,
    pub preliminary_score: i32,
    pub scoring_model: String,
    pub recency: f64,
}
