//! Scripted provider used by evaluator, processor and route tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{LlmError, ProviderClient};

/// A reply the extractor turns into skills_match 80, experience_gap 10,
/// success_probability 70.
pub const GOOD_REPLY: &str = r#"<think>hmm</think>{"skills_match": 80, "experience_gap": 10,
    "success_probability": 70, "reasoning": "Solid overlap"}"#;

/// Replays scripted replies in order; `None` is an upstream 500. Once the script runs
/// out, every call gets `fallback` (or a 500 when there is none).
pub struct ScriptedClient {
    name: &'static str,
    replies: Mutex<VecDeque<Option<String>>>,
    fallback: Option<String>,
    latency: Duration,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ScriptedClient {
    pub fn new(name: &'static str, replies: Vec<Option<&str>>) -> Self {
        Self {
            name,
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            fallback: None,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        }
    }

    pub fn always(name: &'static str, reply: &str) -> Self {
        let mut client = Self::new(name, vec![]);
        client.fallback = Some(reply.to_string());
        client
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    fn name(&self) -> &str {
        self.name
    }

    fn scoring_model(&self) -> String {
        format!("Scripted/{}", self.name)
    }

    fn default_max_tokens(&self) -> u32 {
        100
    }

    fn current_limit(&self) -> u32 {
        60
    }

    async fn send(&self, _prompt: &str, _max_output_tokens: u32) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.replies.lock().unwrap().pop_front();
        let reply = match scripted {
            Some(reply) => reply,
            None => self.fallback.clone(),
        };
        reply.ok_or(LlmError::Api {
            status: 500,
            message: "upstream down".to_string(),
        })
    }
}
