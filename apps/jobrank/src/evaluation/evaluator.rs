//! One retryable `evaluate(job)` call: select a provider, build the prompt, send it,
//! report the outcome to the provider manager, extract scores.
//!
//! Only transport and provider failures are retried. Extraction failures and the
//! no-provider case come back as an error `ScoreRecord` on the first attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::extractor::ScoreExtractor;
use super::prompt::PromptBuilder;
use super::score::ScoreRecord;
use crate::llm_client::{LlmError, ProviderClient, ProviderManager};
use crate::models::Job;

/// Tag recorded when no provider could be selected.
pub const UNAVAILABLE_MODEL: &str = "unavailable";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed_attempts`-th consecutive failure (1-based).
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// A score plus the provider/model tag that produced it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub score: ScoreRecord,
    pub scoring_model: String,
}

impl Evaluation {
    fn failed(message: impl Into<String>, scoring_model: impl Into<String>) -> Self {
        Self {
            score: ScoreRecord::error(message),
            scoring_model: scoring_model.into(),
        }
    }
}

pub struct Evaluator {
    manager: Arc<ProviderManager>,
    clients: Vec<Arc<dyn ProviderClient>>,
    prompts: PromptBuilder,
    extractor: ScoreExtractor,
    retry: RetryPolicy,
}

impl Evaluator {
    pub fn new(
        manager: Arc<ProviderManager>,
        clients: Vec<Arc<dyn ProviderClient>>,
        prompts: PromptBuilder,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            manager,
            clients,
            prompts,
            extractor: ScoreExtractor,
            retry,
        }
    }

    /// Evaluates `job`, retrying provider failures with exponential backoff.
    /// Returns `Err` only once every attempt has failed upstream.
    pub async fn evaluate(&self, job: &Job) -> Result<Evaluation, LlmError> {
        let mut failed_attempts = 0;
        loop {
            match self.attempt(job).await {
                Ok(evaluation) => return Ok(evaluation),
                Err(e) => {
                    failed_attempts += 1;
                    if failed_attempts >= self.retry.max_attempts {
                        error!(
                            "Job {} failed after {failed_attempts} attempts: {e}",
                            job.id
                        );
                        return Err(e);
                    }
                    let wait = self.retry.backoff(failed_attempts);
                    warn!(
                        "Job {} attempt {failed_attempts} failed: {e}. Retrying in {}s",
                        job.id,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn attempt(&self, job: &Job) -> Result<Evaluation, LlmError> {
        let Some(provider) = self.manager.select() else {
            error!("No available providers.");
            return Ok(Evaluation::failed(
                "No available providers.",
                UNAVAILABLE_MODEL,
            ));
        };

        let Some(client) = self.clients.iter().find(|c| c.name() == provider) else {
            let e = LlmError::UnknownProvider(provider.clone());
            error!("{e}");
            return Ok(Evaluation::failed(e.to_string(), UNAVAILABLE_MODEL));
        };

        let prompt = self.prompts.build(job);
        let raw = match client.send(&prompt, client.default_max_tokens()).await {
            Ok(raw) => raw,
            Err(e) => {
                self.manager.report_failure(&provider);
                return Err(e);
            }
        };
        self.manager.report_success(&provider);

        debug!("Raw response ({provider}): {raw}");
        let score = self.extractor.extract(&raw).with_token_counts(
            self.prompts.count_tokens(&prompt),
            self.prompts.count_tokens(&raw),
        );
        if score.is_error() {
            warn!("Job {}: no usable scores from {provider}", job.id);
        } else {
            info!(
                "Job {} evaluated by {provider}: skills_match={} success_probability={}",
                job.id, score.skills_match, score.success_probability
            );
        }

        Ok(Evaluation {
            score,
            scoring_model: client.scoring_model(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::{ScriptedClient, GOOD_REPLY};
    use crate::llm_client::ProviderRole;
    use tokio::time::Instant;

    fn scripted(name: &'static str, replies: Vec<Option<&str>>) -> Arc<ScriptedClient> {
        Arc::new(ScriptedClient::new(name, replies))
    }

    fn job() -> Job {
        Job {
            id: 7,
            title: "SRE".to_string(),
            company: "Acme".to_string(),
            location: "Remote".to_string(),
            description: "Operate Kubernetes and Terraform.".to_string(),
            date: "2024-05-01".to_string(),
            applicants_count: Some(20),
            company_size_score: Some(4),
        }
    }

    fn evaluator(
        providers: Vec<(&str, ProviderRole)>,
        clients: Vec<Arc<ScriptedClient>>,
    ) -> (Evaluator, Arc<ProviderManager>) {
        let manager = Arc::new(ProviderManager::new(
            providers
                .into_iter()
                .map(|(name, role)| (name.to_string(), role))
                .collect(),
        ));
        let clients = clients
            .into_iter()
            .map(|c| c as Arc<dyn ProviderClient>)
            .collect();
        let prompts = PromptBuilder::new("Job:\n{job_description}").unwrap();
        (
            Evaluator::new(manager.clone(), clients, prompts, RetryPolicy::default()),
            manager,
        )
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let waits: Vec<u64> = (1..=5).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(waits, vec![10, 20, 40, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_evaluation() {
        let client = scripted("together", vec![Some(GOOD_REPLY)]);
        let (evaluator, manager) =
            evaluator(vec![("together", ProviderRole::Secondary)], vec![client.clone()]);

        let evaluation = evaluator.evaluate(&job()).await.unwrap();
        assert_eq!(evaluation.scoring_model, "Scripted/together");
        assert_eq!(evaluation.score.skills_match, 80);
        assert_eq!(evaluation.score.reasoning, "Solid overlap");
        assert!(evaluation.score.query_token_count > 0);
        assert!(evaluation.score.response_token_count > 0);
        assert_eq!(client.calls(), 1);
        // Secondary success grants current_step + 1 credits.
        assert_eq!(manager.secondary_credits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_with_backoff() {
        let client = scripted("openrouter", vec![None, None, Some(GOOD_REPLY)]);
        let (evaluator, _) =
            evaluator(vec![("openrouter", ProviderRole::Primary)], vec![client.clone()]);

        let start = Instant::now();
        let evaluation = evaluator.evaluate(&job()).await.unwrap();
        assert_eq!(evaluation.score.skills_match, 80);
        assert_eq!(client.calls(), 3);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let client = scripted("openrouter", vec![]);
        let (evaluator, _) =
            evaluator(vec![("openrouter", ProviderRole::Primary)], vec![client.clone()]);

        let start = Instant::now();
        let result = evaluator.evaluate(&job()).await;
        assert!(matches!(result, Err(LlmError::Api { status: 500, .. })));
        assert_eq!(client.calls(), 5);
        assert!(start.elapsed() >= Duration::from_secs(130));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_move_traffic_to_secondary() {
        let primary = scripted("openrouter", vec![None, None]);
        let secondary = scripted("together", vec![None, Some(GOOD_REPLY)]);
        let (evaluator, manager) = evaluator(
            vec![
                ("together", ProviderRole::Secondary),
                ("openrouter", ProviderRole::Primary),
            ],
            vec![primary.clone(), secondary.clone()],
        );

        // together (credit), openrouter, openrouter -> cooldown, together.
        let evaluation = evaluator.evaluate(&job()).await.unwrap();
        assert_eq!(evaluation.scoring_model, "Scripted/together");
        assert_eq!(primary.calls(), 2);
        assert_eq!(secondary.calls(), 2);
        assert!(manager
            .status()
            .iter()
            .any(|s| s.name == "openrouter" && s.cooling_down));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_evaluation_reports_nothing() {
        for reply in [Some(GOOD_REPLY), None] {
            let client = Arc::new(
                ScriptedClient::new("together", vec![reply]).with_latency(Duration::from_secs(10)),
            );
            let (evaluator, manager) =
                evaluator(vec![("together", ProviderRole::Secondary)], vec![client.clone()]);
            let evaluator = Arc::new(evaluator);

            let task = tokio::spawn({
                let evaluator = evaluator.clone();
                async move { evaluator.evaluate(&job()).await }
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(client.calls(), 1);

            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
            tokio::time::sleep(Duration::from_secs(30)).await;

            assert_eq!(manager.secondary_credits(), 1);
            let status = manager.status();
            assert_eq!(status[0].consecutive_failures, 0);
            assert!(!status[0].cooling_down);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_provider_returns_error_record() {
        let (evaluator, _) = evaluator(vec![], vec![]);
        let evaluation = evaluator.evaluate(&job()).await.unwrap();
        assert_eq!(evaluation.score, ScoreRecord::error("No available providers."));
        assert_eq!(evaluation.scoring_model, UNAVAILABLE_MODEL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_without_client_returns_error_record() {
        let (evaluator, _) = evaluator(vec![("together", ProviderRole::Secondary)], vec![]);
        let evaluation = evaluator.evaluate(&job()).await.unwrap();
        assert!(evaluation.score.is_error());
        assert!(evaluation.score.reasoning.contains("together"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_failure_is_not_retried() {
        let client = scripted("together", vec![Some("I refuse to answer.")]);
        let (evaluator, manager) =
            evaluator(vec![("together", ProviderRole::Secondary)], vec![client.clone()]);

        let evaluation = evaluator.evaluate(&job()).await.unwrap();
        assert!(evaluation.score.is_error());
        assert_eq!(evaluation.score.reasoning, "Extraction failed.");
        assert_eq!(client.calls(), 1);
        // The call itself succeeded upstream.
        assert_eq!(manager.secondary_credits(), 2);
    }
}
