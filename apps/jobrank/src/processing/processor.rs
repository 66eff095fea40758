//! Scoring pass driver.
//!
//! A pass fetches candidate ids, skips those still waiting out a retry cooldown,
//! evaluates the rest under a shared concurrency gate, ranks each result and writes it
//! back. Completion order is whatever the providers deliver.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::store::{JobStore, BATCH_LIMIT};
use crate::evaluation::{ranking, Evaluator, ScoreRecord};
use crate::models::{Job, RankedJob};

/// Pause before returning from a pass that found nothing to do.
pub const IDLE_WAIT: Duration = Duration::from_secs(30);
/// Pause between passes in endless mode.
pub const PASS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipe {
    Scoring,
    Rescoring,
    All,
}

impl FromStr for Recipe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scoring" => Ok(Recipe::Scoring),
            "rescoring" => Ok(Recipe::Rescoring),
            "all" => Ok(Recipe::All),
            other => Err(format!(
                "unknown recipe '{other}', use scoring, rescoring or all"
            )),
        }
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Recipe::Scoring => "scoring",
            Recipe::Rescoring => "rescoring",
            Recipe::All => "all",
        };
        f.write_str(name)
    }
}

/// Which candidates a single pass works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Scoring,
    Rescoring,
}

/// Job id → earliest instant the job may be attempted again.
#[derive(Debug)]
pub struct RetrySchedule {
    deadlines: HashMap<i64, Instant>,
    cooldown: Duration,
}

impl RetrySchedule {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            deadlines: HashMap::new(),
            cooldown,
        }
    }

    pub fn is_eligible(&self, id: i64, now: Instant) -> bool {
        self.deadlines.get(&id).map_or(true, |deadline| now >= *deadline)
    }

    pub fn defer(&mut self, id: i64, now: Instant) {
        self.deadlines.insert(id, now + self.cooldown);
    }

    pub fn clear(&mut self, id: i64) {
        self.deadlines.remove(&id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

pub struct Processor {
    store: Arc<dyn JobStore>,
    scoring: Arc<Evaluator>,
    rescoring: Arc<Evaluator>,
    /// Tags the rescoring evaluator writes; jobs already carrying one are not rescored.
    rescoring_tags: Vec<String>,
    rescoring_min_score: i32,
    gate: Arc<Semaphore>,
    retry_cooldown: Duration,
}

impl Processor {
    pub fn new(
        store: Arc<dyn JobStore>,
        scoring: Arc<Evaluator>,
        rescoring: Arc<Evaluator>,
        rescoring_tags: Vec<String>,
        rescoring_min_score: i32,
        gate: Arc<Semaphore>,
        retry_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            scoring,
            rescoring,
            rescoring_tags,
            rescoring_min_score,
            gate,
            retry_cooldown,
        }
    }

    /// Runs passes for `recipe` once, or forever when `endless` is set. In endless mode
    /// a failed pass is logged and the loop carries on.
    pub async fn run(&self, recipe: Recipe, endless: bool) -> Result<()> {
        info!("Starting processor (recipe: {recipe}, endless: {endless})");
        let mut scoring_retries = RetrySchedule::new(self.retry_cooldown);
        let mut rescoring_retries = RetrySchedule::new(self.retry_cooldown);

        loop {
            let outcome = match recipe {
                Recipe::Scoring => self
                    .run_pass(PassKind::Scoring, &mut scoring_retries)
                    .await
                    .map(|scored| info!("Scoring mode processed {} jobs.", scored.len())),
                Recipe::Rescoring => self
                    .run_pass(PassKind::Rescoring, &mut rescoring_retries)
                    .await
                    .map(|rescored| info!("Rescoring mode processed {} jobs.", rescored.len())),
                Recipe::All => {
                    let (scored, rescored) = tokio::join!(
                        self.run_pass(PassKind::Scoring, &mut scoring_retries),
                        self.run_pass(PassKind::Rescoring, &mut rescoring_retries),
                    );
                    match (scored, rescored) {
                        (Ok(scored), Ok(rescored)) => {
                            info!(
                                "All mode: scoring processed {} jobs; rescoring processed {} jobs.",
                                scored.len(),
                                rescored.len()
                            );
                            Ok(())
                        }
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    }
                }
            };

            if let Err(e) = outcome {
                if !endless {
                    return Err(e);
                }
                error!("Pass failed: {e:#}");
            }

            if !endless {
                return Ok(());
            }
            info!("Waiting {} seconds before next pass...", PASS_INTERVAL.as_secs());
            tokio::time::sleep(PASS_INTERVAL).await;
        }
    }

    /// One pass over the current candidates. Jobs that fail are deferred in `retries`.
    pub async fn run_pass(
        &self,
        kind: PassKind,
        retries: &mut RetrySchedule,
    ) -> Result<Vec<RankedJob>> {
        let (ids, evaluator) = match kind {
            PassKind::Scoring => (
                self.store.job_ids_for_scoring(BATCH_LIMIT).await?,
                self.scoring.clone(),
            ),
            PassKind::Rescoring => (
                self.store
                    .job_ids_for_rescoring(
                        BATCH_LIMIT,
                        self.rescoring_min_score,
                        &self.rescoring_tags,
                    )
                    .await?,
                self.rescoring.clone(),
            ),
        };
        info!("{kind:?} pass: found {} jobs.", ids.len());

        if ids.is_empty() {
            info!("No jobs found. Waiting {} seconds.", IDLE_WAIT.as_secs());
            tokio::time::sleep(IDLE_WAIT).await;
            return Ok(Vec::new());
        }

        let today = Utc::now().date_naive();
        let now = Instant::now();
        let mut tasks = JoinSet::new();

        for id in ids {
            if !retries.is_eligible(id, now) {
                continue;
            }
            let job = match self.store.get_job_by_id(id).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping job {id}: {e:#}");
                    retries.defer(id, now);
                    continue;
                }
            };

            let store = self.store.clone();
            let evaluator = evaluator.clone();
            let gate = self.gate.clone();
            tasks.spawn(async move {
                let outcome = evaluate_and_store(job, evaluator, store, gate, today).await;
                (id, outcome)
            });
        }

        if tasks.is_empty() {
            info!("No jobs processed in this cycle.");
        }

        let mut ranked = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(job))) => {
                    retries.clear(id);
                    ranked.push(job);
                }
                Ok((id, Err(e))) => {
                    error!("Error processing job {id}: {e:#}");
                    retries.defer(id, Instant::now());
                }
                Err(e) => error!("Evaluation task aborted: {e}"),
            }
        }

        Ok(ranked)
    }
}

async fn evaluate_and_store(
    job: Job,
    evaluator: Arc<Evaluator>,
    store: Arc<dyn JobStore>,
    gate: Arc<Semaphore>,
    today: NaiveDate,
) -> Result<RankedJob> {
    let Ok(_permit) = gate.acquire_owned().await else {
        bail!("concurrency gate closed");
    };

    let evaluation = evaluator.evaluate(&job).await?;
    // Storing an error record would stamp `last_scored_at` and retire the job.
    if evaluation.score.is_error() {
        bail!(
            "unusable evaluation from {}: {}",
            evaluation.scoring_model,
            evaluation.score.reasoning
        );
    }
    let ranked = rank_job(job, evaluation.score, evaluation.scoring_model, today);
    store.update_job_scores(&ranked).await?;
    info!(
        "Job {} updated: preliminary score = {}",
        ranked.job.id, ranked.preliminary_score
    );
    Ok(ranked)
}

/// Merges an evaluation into its job and computes the rank.
pub fn rank_job(
    job: Job,
    score: ScoreRecord,
    scoring_model: String,
    today: NaiveDate,
) -> RankedJob {
    let recency = ranking::recency_score(&job.date, today);
    let preliminary_score = ranking::preliminary_score(
        &score,
        recency,
        job.applicants_count,
        job.company_size_score,
    );
    RankedJob {
        job,
        score,
        preliminary_score,
        scoring_model,
        recency,
    }
}
