//! OpenAI-style chat completion envelope shared by every provider.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::rate_limiter::{parse_rate_descriptor, LimitSource};
use super::LlmError;

/// Requests are sampled deterministically.
pub const TEMPERATURE: f32 = 0.0;

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

impl<'a> ChatRequest<'a> {
    pub fn new(model: &'a str, system: &'a str, prompt: &'a str, max_tokens: u32) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens,
        }
    }

    /// Serializes the request and overlays provider-specific body parameters.
    pub fn to_body(&self, extra: &Map<String, Value>) -> Result<Value, LlmError> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut body {
            for (key, value) in extra {
                fields.insert(key.clone(), value.clone());
            }
        }
        Ok(body)
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

impl ChatResponse {
    /// Completion text of the first choice, if it is present and non-blank.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
            .filter(|t| !t.trim().is_empty())
    }
}

/// A successful completion plus the provider's advertised limit header, if any.
#[derive(Debug)]
pub struct ChatReply {
    pub text: String,
    pub rate_limit_header: Option<String>,
}

/// Sends a prepared chat request and unwraps the completion text.
pub async fn send_chat(provider: &str, request: RequestBuilder) -> Result<ChatReply, LlmError> {
    let response = request.send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("{provider} API failed {status}: {body}");
        return Err(LlmError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let rate_limit_header = response
        .headers()
        .get("x-ratelimit-limit")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.text().await?;
    debug!("{provider} API raw response: {body}");
    let parsed: ChatResponse = serde_json::from_str(&body)?;

    match parsed.text() {
        Some(text) => Ok(ChatReply {
            text: text.to_string(),
            rate_limit_header,
        }),
        None => {
            error!("Invalid response structure from {provider}: {body}");
            Err(LlmError::EmptyContent)
        }
    }
}

#[derive(Debug, Deserialize)]
struct AccountKeyResponse {
    rate_limit: Option<String>,
    data: Option<AccountKeyData>,
}

#[derive(Debug, Deserialize)]
struct AccountKeyData {
    rate_limit: Option<Value>,
}

/// Default descriptor assumed when the account endpoint omits one.
const DEFAULT_RATE_DESCRIPTOR: &str = "10s";

impl AccountKeyResponse {
    fn descriptor(&self) -> String {
        if let Some(top) = &self.rate_limit {
            return top.clone();
        }
        match self.data.as_ref().and_then(|d| d.rate_limit.as_ref()) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(o)) => match (o.get("requests"), o.get("interval")) {
                (Some(Value::Number(n)), Some(Value::String(interval))) => {
                    // {"requests": 20, "interval": "10s"} → seconds per request
                    match (n.as_f64(), interval.trim_end_matches('s').parse::<f64>()) {
                        (Some(requests), Ok(seconds)) if requests > 0.0 => {
                            format!("{}s", seconds / requests)
                        }
                        _ => DEFAULT_RATE_DESCRIPTOR.to_string(),
                    }
                }
                _ => DEFAULT_RATE_DESCRIPTOR.to_string(),
            },
            _ => DEFAULT_RATE_DESCRIPTOR.to_string(),
        }
    }
}

/// Authenticated GET against a provider's key-status endpoint.
pub struct AccountLimitSource {
    http: Client,
    url: &'static str,
    api_key: String,
}

impl AccountLimitSource {
    pub fn new(http: Client, url: &'static str, api_key: &str) -> Self {
        Self {
            http,
            url,
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl LimitSource for AccountLimitSource {
    async fn fetch_limit(&self) -> Result<u32, LlmError> {
        let response = self
            .http
            .get(self.url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: format!("rate limit lookup at {} failed", self.url),
            });
        }

        let account: AccountKeyResponse = response.json().await?;
        let descriptor = account.descriptor();
        parse_rate_descriptor(&descriptor).ok_or_else(|| LlmError::Api {
            status: status.as_u16(),
            message: format!("unrecognised rate descriptor '{descriptor}'"),
        })
    }
}
