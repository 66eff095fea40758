//! The normalized, bounded result of one evaluation.
//!
//! Every 0–100 field is stored as `u8` and only ever produced through
//! `clamp_percent`, so an out-of-range or NaN value cannot reach a `ScoreRecord`.

use serde::{Deserialize, Serialize};

/// Areas text attached to every error record.
pub const ERROR_AREAS: &str = "Error during evaluation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub skills_match: u8,
    pub experience_gap: u8,
    pub model_fit_score: u8,
    pub success_probability: u8,
    pub role_complexity: u8,
    pub effort_days_to_fit: u32,
    pub critical_skill_mismatch_penalty: u8,
    pub reasoning: String,
    pub areas_for_development: String,
    /// Diagnostic only.
    pub query_token_count: u32,
    /// Diagnostic only.
    pub response_token_count: u32,
    /// Set only by `ScoreRecord::error`; never read from or written to the wire.
    #[serde(skip)]
    pub failed: bool,
}

impl ScoreRecord {
    /// The canonical "this evaluation was not usable" record. Ranks very low by
    /// construction; `reasoning` tells an operator why.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            skills_match: 0,
            experience_gap: 15,
            model_fit_score: 0,
            success_probability: 50,
            role_complexity: 50,
            effort_days_to_fit: 10,
            critical_skill_mismatch_penalty: 0,
            reasoning: message.into(),
            areas_for_development: ERROR_AREAS.to_string(),
            query_token_count: 0,
            response_token_count: 0,
            failed: true,
        }
    }

    pub fn is_error(&self) -> bool {
        self.failed
    }

    pub fn with_token_counts(mut self, query: usize, response: usize) -> Self {
        self.query_token_count = u32::try_from(query).unwrap_or(u32::MAX);
        self.response_token_count = u32::try_from(response).unwrap_or(u32::MAX);
        self
    }
}

/// Rounds and clamps to `[0, 100]`. Non-finite input maps to 0.
pub fn clamp_percent(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Rounds to a non-negative whole number of days.
pub fn clamp_days(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, u32::MAX as f64) as u32
}
