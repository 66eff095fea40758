//! Provider selection with failure counting and timed cooldowns.
//!
//! With a primary (paid) and a secondary (free-tier) provider configured, traffic is
//! biased toward the secondary through a credit counter that grows with every success
//! on the secondary. A provider that fails twice in a row cools down for 60 seconds;
//! while the primary is cooling down all traffic goes to the secondary.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub const FAILURE_THRESHOLD: u32 = 2;
pub const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    Primary,
    Secondary,
}

#[derive(Debug)]
struct ProviderState {
    name: String,
    role: ProviderRole,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl ProviderState {
    fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug)]
struct ManagerState {
    providers: Vec<ProviderState>,
    current_step: u32,
    secondary_credits: u32,
}

impl ManagerState {
    fn find_mut(&mut self, name: &str) -> Option<&mut ProviderState> {
        self.providers.iter_mut().find(|p| p.name == name)
    }

    fn has_secondary(&self) -> bool {
        self.providers.iter().any(|p| p.role == ProviderRole::Secondary)
    }

    fn replenish_secondary(&mut self) {
        if self.has_secondary() {
            self.secondary_credits = self.current_step + 1;
        }
    }
}

/// Point-in-time view of one provider, for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub role: ProviderRole,
    pub consecutive_failures: u32,
    pub cooling_down: bool,
    pub cooldown_remaining_secs: u64,
}

pub struct ProviderManager {
    state: Mutex<ManagerState>,
}

impl ProviderManager {
    pub fn new(providers: Vec<(String, ProviderRole)>) -> Self {
        let providers = providers
            .into_iter()
            .map(|(name, role)| ProviderState {
                name,
                role,
                consecutive_failures: 0,
                cooldown_until: None,
            })
            .collect();

        Self {
            state: Mutex::new(ManagerState {
                providers,
                current_step: 1,
                secondary_credits: 1,
            }),
        }
    }

    /// Picks the provider for the next request, or `None` if nothing is configured.
    pub fn select(&self) -> Option<String> {
        let mut state = self.lock();
        let now = Instant::now();

        if state.providers.len() <= 1 {
            return state.providers.first().map(|p| p.name.clone());
        }

        let primary = state
            .providers
            .iter()
            .find(|p| p.role == ProviderRole::Primary);
        let secondary = state
            .providers
            .iter()
            .find(|p| p.role == ProviderRole::Secondary);

        let (primary, secondary) = match (primary, secondary) {
            (Some(primary), Some(secondary)) => (primary, secondary),
            (Some(primary), None) => return Some(primary.name.clone()),
            _ => return state.providers.first().map(|p| p.name.clone()),
        };

        if primary.is_cooling_down(now) {
            return Some(secondary.name.clone());
        }

        if state.secondary_credits > 0 && !secondary.is_cooling_down(now) {
            let name = secondary.name.clone();
            state.secondary_credits -= 1;
            return Some(name);
        }

        Some(primary.name.clone())
    }

    pub fn report_success(&self, name: &str) {
        let mut state = self.lock();
        let next_credits = state.current_step + 1;

        let Some(provider) = state.find_mut(name) else {
            error!("Success reported for unknown provider '{name}'.");
            return;
        };
        provider.consecutive_failures = 0;
        let is_secondary = provider.role == ProviderRole::Secondary;

        if is_secondary {
            state.secondary_credits = next_credits;
        }
        state.current_step += 1;
    }

    pub fn report_failure(&self, name: &str) {
        let mut state = self.lock();

        let Some(provider) = state.find_mut(name) else {
            error!("Failure reported for unknown provider '{name}'.");
            return;
        };
        provider.consecutive_failures += 1;
        warn!(
            "Provider '{name}' failed ({} consecutive)",
            provider.consecutive_failures
        );

        if provider.consecutive_failures >= FAILURE_THRESHOLD {
            provider.cooldown_until = Some(Instant::now() + COOLDOWN);
            provider.consecutive_failures = 0;
            info!("Provider '{name}' cooling down for {}s", COOLDOWN.as_secs());
            state.replenish_secondary();
        }
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        let state = self.lock();
        let now = Instant::now();
        state
            .providers
            .iter()
            .map(|p| {
                let remaining = p
                    .cooldown_until
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or_default();
                ProviderStatus {
                    name: p.name.clone(),
                    role: p.role,
                    consecutive_failures: p.consecutive_failures,
                    cooling_down: p.is_cooling_down(now),
                    cooldown_remaining_secs: remaining.as_secs(),
                }
            })
            .collect()
    }

    /// Calls the secondary provider may still take before traffic returns to the primary.
    pub fn secondary_credits(&self) -> u32 {
        self.lock().secondary_credits
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi() -> ProviderManager {
        ProviderManager::new(vec![
            ("together".to_string(), ProviderRole::Secondary),
            ("openrouter".to_string(), ProviderRole::Primary),
        ])
    }

    #[test]
    fn test_no_providers_selects_nothing() {
        let manager = ProviderManager::new(vec![]);
        assert_eq!(manager.select(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_provider_always_selected() {
        let manager = ProviderManager::new(vec![("together".to_string(), ProviderRole::Secondary)]);
        manager.report_failure("together");
        manager.report_failure("together");
        for _ in 0..5 {
            assert_eq!(manager.select().as_deref(), Some("together"));
        }
    }

    #[test]
    fn test_secondary_credit_then_primary() {
        let manager = multi();
        assert_eq!(manager.select().as_deref(), Some("together"));
        assert_eq!(manager.select().as_deref(), Some("openrouter"));
        assert_eq!(manager.select().as_deref(), Some("openrouter"));
    }

    #[test]
    fn test_secondary_success_grows_credits() {
        let manager = multi();
        assert_eq!(manager.select().as_deref(), Some("together"));
        manager.report_success("together");
        assert_eq!(manager.secondary_credits(), 2);

        assert_eq!(manager.select().as_deref(), Some("together"));
        manager.report_success("together");
        assert_eq!(manager.secondary_credits(), 3);

        for _ in 0..3 {
            assert_eq!(manager.select().as_deref(), Some("together"));
        }
        assert_eq!(manager.select().as_deref(), Some("openrouter"));
    }

    #[test]
    fn test_primary_success_advances_step_only() {
        let manager = multi();
        manager.select();
        assert_eq!(manager.secondary_credits(), 0);
        manager.report_success("openrouter");
        assert_eq!(manager.secondary_credits(), 0);
        manager.report_success("together");
        assert_eq!(manager.secondary_credits(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_cooldown_routes_to_secondary_until_expiry() {
        let manager = multi();
        // Exhaust the secondary's credit.
        assert_eq!(manager.select().as_deref(), Some("together"));
        assert_eq!(manager.select().as_deref(), Some("openrouter"));

        manager.report_failure("openrouter");
        assert_eq!(manager.select().as_deref(), Some("openrouter"));
        manager.report_failure("openrouter");

        // Cooling down: the secondary serves regardless of credits.
        for _ in 0..3 {
            assert_eq!(manager.select().as_deref(), Some("together"));
        }
        assert!(manager.status().iter().any(|s| s.name == "openrouter" && s.cooling_down));

        tokio::time::advance(COOLDOWN + Duration::from_secs(1)).await;

        // Cooldown replenished the secondary to current_step + 1 = 2 credits.
        assert_eq!(manager.select().as_deref(), Some("together"));
        assert_eq!(manager.select().as_deref(), Some("together"));
        assert_eq!(manager.select().as_deref(), Some("openrouter"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_does_not_cool_down() {
        let manager = multi();
        manager.select();
        manager.report_failure("openrouter");
        let status = manager.status();
        let primary = status.iter().find(|s| s.name == "openrouter").unwrap();
        assert_eq!(primary.consecutive_failures, 1);
        assert!(!primary.cooling_down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_counter() {
        let manager = multi();
        manager.select();
        manager.report_failure("openrouter");
        manager.report_success("openrouter");
        manager.report_failure("openrouter");
        let status = manager.status();
        let primary = status.iter().find(|s| s.name == "openrouter").unwrap();
        assert_eq!(primary.consecutive_failures, 1);
        assert!(!primary.cooling_down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooling_secondary_is_skipped() {
        let manager = multi();
        manager.report_failure("together");
        manager.report_failure("together");
        // Credits were replenished but the secondary is cooling down.
        assert_eq!(manager.select().as_deref(), Some("openrouter"));

        tokio::time::advance(COOLDOWN + Duration::from_secs(1)).await;
        assert_eq!(manager.select().as_deref(), Some("together"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_remaining_reported() {
        let manager = multi();
        manager.report_failure("openrouter");
        manager.report_failure("openrouter");
        tokio::time::advance(Duration::from_secs(20)).await;
        let status = manager.status();
        let primary = status.iter().find(|s| s.name == "openrouter").unwrap();
        assert_eq!(primary.cooldown_remaining_secs, 40);
        assert_eq!(primary.consecutive_failures, 0);
    }

    #[test]
    fn test_unknown_provider_reports_are_ignored() {
        let manager = multi();
        manager.report_failure("anthropic");
        manager.report_success("anthropic");
        assert_eq!(manager.secondary_credits(), 1);
        assert!(manager.status().iter().all(|s| s.consecutive_failures == 0));
    }
}
