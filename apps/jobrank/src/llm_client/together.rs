//! Together, the secondary (free-tier class) provider.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::chat::{send_chat, AccountLimitSource, ChatRequest};
use super::prompts::SYSTEM_MESSAGE;
use super::rate_limiter::{parse_rps_header, RateLimiter};
use super::{LlmError, ProviderClient};
use crate::config::TogetherSettings;

pub const PROVIDER_NAME: &str = "together";
const CHAT_URL: &str = "https://api.together.xyz/v1/chat/completions";
const KEY_URL: &str = "https://api.together.ai/v1/auth/key";
const MAX_TOKENS: u32 = 8_000;

/// Model with a provider-imposed per-minute ceiling.
pub const RESTRICTED_MODEL: &str = "deepseek-ai/DeepSeek-R1";
pub const RESTRICTED_MODEL_RPM: u32 = 6;

/// Builds the account-wide limiter shared by the scoring and rescoring models. The
/// restricted-model ceiling applies when either of them is the restricted model.
pub fn build_limiter(http: &Client, settings: &TogetherSettings) -> RateLimiter {
    let limiter = RateLimiter::new("Together", settings.rpm).with_source(Box::new(
        AccountLimitSource::new(http.clone(), KEY_URL, &settings.api_key),
    ));
    if [settings.model.as_str(), settings.rescoring_model()].contains(&RESTRICTED_MODEL) {
        limiter.with_ceiling(RESTRICTED_MODEL_RPM)
    } else {
        limiter
    }
}

pub struct TogetherClient {
    http: Client,
    api_key: String,
    model: String,
    extra_params: Map<String, Value>,
    limiter: Arc<RateLimiter>,
}

impl TogetherClient {
    pub fn new(
        http: Client,
        settings: &TogetherSettings,
        model: &str,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            http,
            api_key: settings.api_key.clone(),
            model: model.to_string(),
            extra_params: settings.extra_params.clone(),
            limiter,
        }
    }

    /// Applies an `x-ratelimit-limit` header value to the shared limiter.
    fn apply_limit_header(&self, value: &str) {
        match parse_rps_header(value) {
            Some(rpm) => self.limiter.set_limit(rpm),
            None => debug!("Failed to parse Together rate limit header: {value}"),
        }
    }
}

#[async_trait]
impl ProviderClient for TogetherClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn scoring_model(&self) -> String {
        format!("Together/{}", self.model)
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
            .to_body(&self.extra_params)?;
        let request = self.http.post(CHAT_URL).bearer_auth(&self.api_key).json(&body);

        info!("Sending evaluation to Together ({})", self.model);
        let reply = send_chat("Together", request).await?;
        if let Some(header) = &reply.rate_limit_header {
            self.apply_limit_header(header);
        }
        Ok(reply.text)
    }
}
