//! Ranking formula applied after evaluation. Pure arithmetic, no I/O.
//!
//! ```text
//! penalty = min(80, experience_gap + critical_skill_mismatch_penalty)
//! base    = max(skills_match - penalty, 1) * success_probability / 100
//! score   = base * competition_factor(applicants)
//!         + (recency - 50) * 0.2
//!         + (company_size - 50) * 0.1
//! rank    = clamp(score, 0, 100)
//! ```

use chrono::NaiveDate;
use tracing::warn;

use super::score::ScoreRecord;

const MAX_PENALTY: f64 = 80.0;
const MIN_BASE: f64 = 1.0;
/// Applicant counts above this no longer lower the rank.
pub const APPLICANT_CAP: u32 = 500;
const PENALTY_PER_APPLICANT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.2;
const COMPANY_SIZE_WEIGHT: f64 = 0.1;
/// Postings older than this score zero recency.
pub const RECENCY_MAX_DAYS: i64 = 60;

/// 100 for a posting from `today`, falling linearly to 0 at 60 days. Unparseable
/// dates score 0; future dates count as today.
pub fn recency_score(posted: &str, today: NaiveDate) -> f64 {
    let posted = match NaiveDate::parse_from_str(posted.trim(), "%Y-%m-%d") {
        Ok(date) => date,
        Err(e) => {
            warn!("Error calculating recency score for '{posted}': {e}");
            return 0.0;
        }
    };

    let days = (today - posted).num_days().max(0);
    if days > RECENCY_MAX_DAYS {
        return 0.0;
    }
    (100.0 * (1.0 - days as f64 / RECENCY_MAX_DAYS as f64)).clamp(0.0, 100.0)
}

/// Desirability of a company-size bucket, peaking at mid-size (3–5).
pub fn company_size_score(rank: Option<i32>) -> f64 {
    let Some(rank) = rank else {
        return 0.0;
    };
    match rank.max(0) {
        3..=5 => 100.0,
        6 => 80.0,
        7 => 60.0,
        8.. => 40.0,
        small => (50.0 - 5.0 * small as f64).max(0.0),
    }
}

/// Multiplier in `[0, 1]`; each applicant up to the cap removes 0.2 points of 100.
pub fn competition_factor(applicants: Option<i32>) -> f64 {
    let applicants = applicants.unwrap_or(0).max(0) as u32;
    let capped = applicants.min(APPLICANT_CAP) as f64;
    (100.0 - capped * PENALTY_PER_APPLICANT).max(0.0) / 100.0
}

/// Combines an evaluation with job metadata into a rank in `[0, 100]`.
pub fn rank(
    score: &ScoreRecord,
    recency: f64,
    applicants: Option<i32>,
    company_size_rank: Option<i32>,
) -> f64 {
    let penalty = (f64::from(score.experience_gap)
        + f64::from(score.critical_skill_mismatch_penalty))
    .min(MAX_PENALTY);
    let base = (f64::from(score.skills_match) - penalty).max(MIN_BASE);

    let mut value = base * f64::from(score.success_probability) / 100.0;
    value *= competition_factor(applicants);
    value += (recency - 50.0) * RECENCY_WEIGHT;
    value += (company_size_score(company_size_rank) - 50.0) * COMPANY_SIZE_WEIGHT;

    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// `rank` rounded to the integer persisted as `preliminary_score`.
pub fn preliminary_score(
    score: &ScoreRecord,
    recency: f64,
    applicants: Option<i32>,
    company_size_rank: Option<i32>,
) -> i32 {
    rank(score, recency, applicants, company_size_rank).round() as i32
}
