/// LLM Client: every upstream chat-completion call in jobrank goes through this module.
///
/// Each provider implements `ProviderClient` and owns an `Arc<RateLimiter>` that is
/// admitted before every request. Provider choice between calls is made by
/// `ProviderManager`; retry lives one level up in the evaluator.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

use crate::config::{Config, ProviderMode};

pub mod chat;
pub mod openrouter;
pub mod prompts;
pub mod provider_manager;
pub mod rate_limiter;
pub mod together;

#[cfg(test)]
pub mod testing;

pub use openrouter::OpenRouterClient;
pub use provider_manager::{ProviderManager, ProviderRole};
pub use together::TogetherClient;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("Provider '{0}' is not configured")]
    UnknownProvider(String),
}

/// Deadline for every upstream request, account-limit lookups included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds the HTTP client shared by every provider. A stalled upstream surfaces as
/// `LlmError::Http` once `timeout` elapses.
pub fn http_client(timeout: Duration) -> Result<Client, LlmError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// One upstream chat-completion provider.
///
/// `send` must admit through the provider's rate limiter before touching the network.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable provider name used by `ProviderManager` ("openrouter", "together").
    fn name(&self) -> &str;

    /// Tag persisted next to each score, e.g. `OpenRouter/deepseek/deepseek-r1:free`.
    fn scoring_model(&self) -> String;

    fn default_max_tokens(&self) -> u32;

    /// Requests per window currently enforced for this provider.
    fn current_limit(&self) -> u32;

    async fn send(&self, prompt: &str, max_output_tokens: u32) -> Result<String, LlmError>;
}

/// The configured providers, split into the clients used for first-pass scoring and
/// the ones used for rescoring. Both sets share one rate limiter per provider since
/// the limit belongs to the account, not the model.
pub struct ProviderSet {
    pub roles: Vec<(String, ProviderRole)>,
    pub scoring: Vec<Arc<dyn ProviderClient>>,
    pub rescoring: Vec<Arc<dyn ProviderClient>>,
}

impl ProviderSet {
    pub fn from_config(config: &Config, http: &Client) -> Self {
        let mut roles = Vec::new();
        let mut scoring: Vec<Arc<dyn ProviderClient>> = Vec::new();
        let mut rescoring: Vec<Arc<dyn ProviderClient>> = Vec::new();

        let wants_together = matches!(config.provider_mode, ProviderMode::Together | ProviderMode::Multi);
        let wants_openrouter =
            matches!(config.provider_mode, ProviderMode::OpenRouter | ProviderMode::Multi);

        // Secondary first: `multi` mode lists together before openrouter.
        if wants_together {
            if let Some(settings) = &config.together {
                let limiter = Arc::new(together::build_limiter(http, settings));
                scoring.push(Arc::new(TogetherClient::new(
                    http.clone(),
                    settings,
                    &settings.model,
                    limiter.clone(),
                )));
                rescoring.push(Arc::new(TogetherClient::new(
                    http.clone(),
                    settings,
                    settings.rescoring_model(),
                    limiter,
                )));
                roles.push((together::PROVIDER_NAME.to_string(), ProviderRole::Secondary));
            }
        }

        if wants_openrouter {
            if let Some(settings) = &config.openrouter {
                let limiter = Arc::new(openrouter::build_limiter(http, settings));
                scoring.push(Arc::new(OpenRouterClient::new(
                    http.clone(),
                    &settings.api_key,
                    &settings.model,
                    limiter.clone(),
                )));
                rescoring.push(Arc::new(OpenRouterClient::new(
                    http.clone(),
                    &settings.api_key,
                    settings.rescoring_model(),
                    limiter,
                )));
                roles.push((openrouter::PROVIDER_NAME.to_string(), ProviderRole::Primary));
            }
        }

        for client in &scoring {
            info!(
                "Provider configured: {} ({} rpm)",
                client.scoring_model(),
                client.current_limit()
            );
        }

        Self {
            roles,
            scoring,
            rescoring,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scoring.is_empty()
    }

    /// Current request limits keyed by provider name.
    pub fn limits(&self) -> HashMap<String, u32> {
        self.scoring
            .iter()
            .map(|c| (c.name().to_string(), c.current_limit()))
            .collect()
    }
}
