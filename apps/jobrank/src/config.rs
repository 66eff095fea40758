use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

use crate::evaluation::prompts::DEFAULT_PROMPT_TEMPLATE;
use crate::processing::processor::Recipe;

pub const DEFAULT_OPENROUTER_MODEL: &str = "deepseek/deepseek-r1:free";
pub const DEFAULT_TOGETHER_MODEL: &str = "deepseek-ai/DeepSeek-R1";
const DEFAULT_RPM: u32 = 55;

/// Which providers the evaluator may route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Together,
    OpenRouter,
    Multi,
}

impl ProviderMode {
    /// Unknown values fall back to `Together`, matching the single-provider default.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "together" => ProviderMode::Together,
            "openrouter" => ProviderMode::OpenRouter,
            "multi" => ProviderMode::Multi,
            other => {
                warn!("Unknown provider_mode '{other}', defaulting to 'together'");
                ProviderMode::Together
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderMode::Together => "together",
            ProviderMode::OpenRouter => "openrouter",
            ProviderMode::Multi => "multi",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub model: String,
    pub rescoring_model: Option<String>,
    pub rpm: u32,
}

impl OpenRouterSettings {
    pub fn rescoring_model(&self) -> &str {
        self.rescoring_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone)]
pub struct TogetherSettings {
    pub api_key: String,
    pub model: String,
    pub rescoring_model: Option<String>,
    pub rpm: u32,
    /// Merged verbatim into every Together request body.
    pub extra_params: Map<String, Value>,
}

impl TogetherSettings {
    pub fn rescoring_model(&self) -> &str {
        self.rescoring_model.as_deref().unwrap_or(&self.model)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub provider_mode: ProviderMode,
    pub openrouter: Option<OpenRouterSettings>,
    pub together: Option<TogetherSettings>,
    pub prompt_template_path: Option<PathBuf>,
    pub concurrency: usize,
    pub recipe: Recipe,
    pub endless: bool,
    pub retry_cooldown: Duration,
    pub rescoring_min_score: i32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let openrouter = match get("OPENROUTER_API_KEY") {
            Some(api_key) => Some(OpenRouterSettings {
                api_key,
                model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
                rescoring_model: get("OPENROUTER_RESCORING_MODEL"),
                rpm: parse_or("OPENROUTER_RPM", get("OPENROUTER_RPM"), DEFAULT_RPM)?,
            }),
            None => None,
        };

        let together = match get("TOGETHER_API_KEY") {
            Some(api_key) => Some(TogetherSettings {
                api_key,
                model: get("TOGETHER_MODEL").unwrap_or_else(|| DEFAULT_TOGETHER_MODEL.to_string()),
                rescoring_model: get("TOGETHER_RESCORING_MODEL"),
                rpm: parse_or("TOGETHER_RPM", get("TOGETHER_RPM"), DEFAULT_RPM)?,
                extra_params: parse_extra_params(get("TOGETHER_EXTRA_PARAMS"))?,
            }),
            None => None,
        };

        let concurrency: usize = parse_or("SCORING_CONCURRENCY", get("SCORING_CONCURRENCY"), 1)?;
        if concurrency == 0 {
            bail!("SCORING_CONCURRENCY must be at least 1");
        }

        Ok(Config {
            database_url: get("DATABASE_URL")
                .context("Required environment variable 'DATABASE_URL' is not set")?,
            port: parse_or("PORT", get("PORT"), 8080)?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            provider_mode: ProviderMode::parse_lenient(
                &get("PROVIDER_MODE").unwrap_or_else(|| "openrouter".to_string()),
            ),
            openrouter,
            together,
            prompt_template_path: get("PROMPT_TEMPLATE_PATH").map(PathBuf::from),
            concurrency,
            recipe: parse_or("SCORING_RECIPE", get("SCORING_RECIPE"), Recipe::All)?,
            endless: parse_or("SCORING_ENDLESS", get("SCORING_ENDLESS"), false)?,
            retry_cooldown: Duration::from_secs(parse_or(
                "RETRY_COOLDOWN_SECS",
                get("RETRY_COOLDOWN_SECS"),
                180,
            )?),
            rescoring_min_score: parse_or("RESCORING_MIN_SCORE", get("RESCORING_MIN_SCORE"), 50)?,
        })
    }

    /// Reads the prompt template, falling back to the built-in one.
    pub fn load_prompt_template(&self) -> Result<String> {
        match &self.prompt_template_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read prompt template '{}'", path.display())),
            None => Ok(DEFAULT_PROMPT_TEMPLATE.to_string()),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has invalid value '{value}': {e}")),
        None => Ok(default),
    }
}

fn parse_extra_params(raw: Option<String>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(&raw).context("TOGETHER_EXTRA_PARAMS must be JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("TOGETHER_EXTRA_PARAMS must be a JSON object"),
    }
}
