//! Sliding-window admission control, one limiter per provider account.
//!
//! `admit()` is awaited immediately before every provider request. The admission log is
//! kept sorted; a caller that finds the window full reserves the first slot that frees up
//! and sleeps until then, so concurrent callers never overshoot the limit. All reads and
//! writes of the log happen under a synchronous lock with no `.await` inside.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::LlmError;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Upstream query for the account's permitted requests per window.
#[async_trait]
pub trait LimitSource: Send + Sync {
    async fn fetch_limit(&self) -> Result<u32, LlmError>;
}

#[derive(Debug)]
struct RateWindow {
    admissions: VecDeque<Instant>,
    limit: u32,
    last_refresh: Option<Instant>,
}

impl RateWindow {
    fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admissions.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct RateLimiter {
    label: String,
    window: Duration,
    ceiling: Option<u32>,
    refresh_interval: Duration,
    source: Option<Box<dyn LimitSource>>,
    state: Mutex<RateWindow>,
}

impl RateLimiter {
    pub fn new(label: impl Into<String>, limit: u32) -> Self {
        Self {
            label: label.into(),
            window: DEFAULT_WINDOW,
            ceiling: None,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            source: None,
            state: Mutex::new(RateWindow {
                admissions: VecDeque::new(),
                limit: limit.max(1),
                last_refresh: None,
            }),
        }
    }

    #[cfg(test)]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Hard cap applied to every limit this limiter is ever given, including the initial one.
    pub fn with_ceiling(mut self, ceiling: u32) -> Self {
        let ceiling = ceiling.max(1);
        self.ceiling = Some(ceiling);
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        state.limit = state.limit.min(ceiling);
        self
    }

    pub fn with_source(mut self, source: Box<dyn LimitSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[cfg(test)]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn limit(&self) -> u32 {
        self.lock().limit
    }

    /// Replaces the permitted requests per window, subject to the ceiling.
    pub fn set_limit(&self, reported: u32) {
        let effective = match self.ceiling {
            Some(ceiling) => reported.min(ceiling),
            None => reported,
        }
        .max(1);

        let mut state = self.lock();
        if state.limit != effective {
            info!(
                "{} rate limit updated: {} -> {} requests/{}s",
                self.label,
                state.limit,
                effective,
                self.window.as_secs()
            );
            state.limit = effective;
        }
    }

    /// Waits until a request may be issued, then records it.
    pub async fn admit(&self) {
        self.refresh_limit().await;

        let now = Instant::now();
        if let Some(wait) = self.reserve(now) {
            debug!(
                "{} rate limiter sleeping for {:.2} seconds",
                self.label,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Records an admission at the earliest slot available from `now` and returns how long
    /// the caller has to wait for it, if at all.
    fn reserve(&self, now: Instant) -> Option<Duration> {
        let mut state = self.lock();
        state.purge(now, self.window);

        let limit = state.limit as usize;
        let slot = if state.admissions.len() >= limit {
            let freeing = state.admissions[state.admissions.len() - limit];
            (freeing + self.window).max(now)
        } else {
            now
        };

        let position = state.admissions.partition_point(|t| *t <= slot);
        state.admissions.insert(position, slot);

        (slot > now).then(|| slot - now)
    }

    /// Best-effort refresh from the account endpoint. Failures keep the prior limit.
    async fn refresh_limit(&self) {
        let Some(source) = &self.source else {
            return;
        };

        {
            let mut state = self.lock();
            let now = Instant::now();
            if let Some(last) = state.last_refresh {
                if now.saturating_duration_since(last) < self.refresh_interval {
                    return;
                }
            }
            state.last_refresh = Some(now);
        }

        match source.fetch_limit().await {
            Ok(limit) => self.set_limit(limit),
            Err(e) => warn!("Failed to update {} rate limit: {e}", self.label),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RateWindow> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn in_window(&self) -> usize {
        self.lock().admissions.len()
    }
}

/// Parses an account rate descriptor such as `"10s"` (one request per ten seconds)
/// into requests per minute.
pub fn parse_rate_descriptor(descriptor: &str) -> Option<u32> {
    let seconds: f64 = descriptor.trim().trim_end_matches('s').trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(((60.0 / seconds) as u32).max(1))
}

/// Parses an `x-ratelimit-limit` header value (requests per second) into requests per minute.
pub fn parse_rps_header(value: &str) -> Option<u32> {
    let rps: f64 = value.trim().parse().ok()?;
    if !rps.is_finite() || rps <= 0.0 {
        return None;
    }
    Some(((rps * 60.0) as u32).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FixedSource {
        limit: Option<u32>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LimitSource for FixedSource {
        async fn fetch_limit(&self) -> Result<u32, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.limit.ok_or(LlmError::Api {
                status: 503,
                message: "unavailable".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_admission_waits_for_window() {
        let limiter = RateLimiter::new("test", 2);
        let start = Instant::now();

        limiter.admit().await;
        limiter.admit().await;
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.admit().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(60), "waited {waited:?}");
        assert!(waited < Duration::from_secs(61), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admissions_respect_limit() {
        let limiter = Arc::new(RateLimiter::new("test", 2));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.admit().await;
                    start.elapsed()
                })
            })
            .collect();

        let mut elapsed = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }
        elapsed.sort();

        assert!(elapsed[1] < Duration::from_secs(1));
        assert!(elapsed[2] >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_admissions_are_purged() {
        let limiter = RateLimiter::new("test", 2);
        limiter.admit().await;
        limiter.admit().await;
        assert_eq!(limiter.in_window(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.admit().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.in_window(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_window() {
        let limiter = RateLimiter::new("test", 1).with_window(Duration::from_secs(10));
        let start = Instant::now();
        limiter.admit().await;
        limiter.admit().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(10));
        assert!(waited < Duration::from_secs(11));
    }

    #[test]
    fn test_ceiling_caps_initial_and_updated_limits() {
        let limiter = RateLimiter::new("test", 55).with_ceiling(6);
        assert_eq!(limiter.limit(), 6);

        limiter.set_limit(30);
        assert_eq!(limiter.limit(), 6);

        limiter.set_limit(3);
        assert_eq!(limiter.limit(), 3);
    }

    #[test]
    fn test_zero_limit_is_raised_to_one() {
        let limiter = RateLimiter::new("test", 0);
        assert_eq!(limiter.limit(), 1);
        limiter.set_limit(0);
        assert_eq!(limiter.limit(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_applies_reported_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let limiter = RateLimiter::new("test", 55).with_source(Box::new(FixedSource {
            limit: Some(6),
            calls: calls.clone(),
        }));

        limiter.admit().await;
        assert_eq!(limiter.limit(), 6);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_prior_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let limiter = RateLimiter::new("test", 12).with_source(Box::new(FixedSource {
            limit: None,
            calls: calls.clone(),
        }));

        limiter.admit().await;
        assert_eq!(limiter.limit(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_runs_at_most_once_per_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let limiter = RateLimiter::new("test", 100)
            .with_refresh_interval(Duration::from_secs(30))
            .with_source(Box::new(FixedSource {
                limit: Some(100),
                calls: calls.clone(),
            }));

        limiter.admit().await;
        limiter.admit().await;
        limiter.admit().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        limiter.admit().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_respects_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let limiter = RateLimiter::new("test", 6)
            .with_ceiling(6)
            .with_source(Box::new(FixedSource {
                limit: Some(60),
                calls,
            }));

        limiter.admit().await;
        assert_eq!(limiter.limit(), 6);
    }

    #[test]
    fn test_parse_rate_descriptor() {
        assert_eq!(parse_rate_descriptor("10s"), Some(6));
        assert_eq!(parse_rate_descriptor("1s"), Some(60));
        assert_eq!(parse_rate_descriptor("0.5s"), Some(120));
        assert_eq!(parse_rate_descriptor("120s"), Some(1));
        assert_eq!(parse_rate_descriptor("0s"), None);
        assert_eq!(parse_rate_descriptor("fast"), None);
    }

    #[test]
    fn test_parse_rps_header() {
        assert_eq!(parse_rps_header("1"), Some(60));
        assert_eq!(parse_rps_header("0.1"), Some(6));
        assert_eq!(parse_rps_header(" 2.5 "), Some(150));
        assert_eq!(parse_rps_header("-1"), None);
        assert_eq!(parse_rps_header("n/a"), None);
    }
}
