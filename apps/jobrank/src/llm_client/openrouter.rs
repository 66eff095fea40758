//! OpenRouter, the primary (paid) provider.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Map;
use tracing::info;

use super::chat::{send_chat, AccountLimitSource, ChatRequest};
use super::prompts::SYSTEM_MESSAGE;
use super::rate_limiter::RateLimiter;
use super::{LlmError, ProviderClient};
use crate::config::OpenRouterSettings;

pub const PROVIDER_NAME: &str = "openrouter";
const CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const KEY_URL: &str = "https://openrouter.ai/api/v1/auth/key";
const MAX_TOKENS: u32 = 10_000;
/// Fixed ceiling for `:free` model variants, whatever the account reports.
pub const FREE_TIER_RPM: u32 = 20;

pub fn is_free_model(model: &str) -> bool {
    model.ends_with(":free")
}

/// Builds the account-wide limiter shared by the scoring and rescoring models. If either
/// is a free variant the whole account is held to the free ceiling and the account
/// lookup is skipped.
pub fn build_limiter(http: &Client, settings: &OpenRouterSettings) -> RateLimiter {
    if is_free_model(&settings.model) || is_free_model(settings.rescoring_model()) {
        RateLimiter::new("OpenRouter", FREE_TIER_RPM).with_ceiling(FREE_TIER_RPM)
    } else {
        RateLimiter::new("OpenRouter", settings.rpm).with_source(Box::new(
            AccountLimitSource::new(http.clone(), KEY_URL, &settings.api_key),
        ))
    }
}

pub struct OpenRouterClient {
    http: Client,
    api_key: String,
    model: String,
    limiter: Arc<RateLimiter>,
}

impl OpenRouterClient {
    pub fn new(http: Client, api_key: &str, model: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            limiter,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenRouterClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn scoring_model(&self) -> String {
        format!("OpenRouter/{}", self.model)
    }

    fn default_max_tokens(&self) -> u32 {
        MAX_TOKENS
    }

    fn current_limit(&self) -> u32 {
        self.limiter.limit()
    }

    async fn send(&self, prompt: &str, max_output_tokens: u32) -> Result<String, LlmError> {
        self.limiter.admit().await;

        let body = ChatRequest::new(&self.model, SYSTEM_MESSAGE, prompt, max_output_tokens)
            .to_body(&Map::new())?;
        let request = self
            .http
            .post(CHAT_URL)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "localhost")
            .header("X-Title", "Job Analyzer")
            .json(&body);

        info!("Sending evaluation to OpenRouter ({})", self.model);
        let reply = send_chat("OpenRouter", request).await?;
        Ok(reply.text)
    }
}
