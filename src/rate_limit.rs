//! Per-provider cooldown windows with exponentially growing duration.
//!
//! Time comes from `tokio::time::Instant`, so tests drive cooldowns with a
//! paused runtime clock instead of sleeping.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default floor for a computed cooldown.
pub const DEFAULT_BASE_COOLDOWN: Duration = Duration::from_secs(30);

/// Default ceiling for a computed cooldown.
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// Explicit (Retry-After) cooldowns are never shorter than this.
const MIN_EXPLICIT_COOLDOWN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub base: Duration,
    pub max: Duration,
}

impl RateLimitConfig {
    /// Build a config, lifting `max` up to `base` if it was set lower.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_COOLDOWN, DEFAULT_MAX_COOLDOWN)
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    cooldown_until: Instant,
    /// Zero after a success: the next signal starts over at the base duration.
    last_backoff: Duration,
}

/// Shared cooldown map. All methods take `&self`; the map sits behind one mutex
/// that is never held across an await.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    config: RateLimitConfig,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimitTracker {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cooling_down(&self, provider: &str) -> bool {
        self.cooldown_remaining(provider).is_some()
    }

    /// Time left before `provider` becomes eligible again, if it is cooling down.
    pub fn cooldown_remaining(&self, provider: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .get(provider)
            .filter(|e| e.cooldown_until > now)
            .map(|e| e.cooldown_until - now)
    }

    /// Record a rate-limit signal and return the cooldown applied.
    ///
    /// Without an explicit duration the cooldown is
    /// `max(base, min(2 × previous, max))`. An explicit duration (e.g. from a
    /// `Retry-After` header) is used as-is, capped at `max`.
    pub fn mark_rate_limited(&self, provider: &str, explicit: Option<Duration>) -> Duration {
        let mut entries = self.lock();
        let previous = entries
            .get(provider)
            .map(|e| e.last_backoff)
            .unwrap_or_default();

        let duration = match explicit {
            Some(d) => d.max(MIN_EXPLICIT_COOLDOWN).min(self.config.max),
            None => self
                .config
                .base
                .max(previous.saturating_mul(2).min(self.config.max)),
        };

        entries.insert(
            provider.to_string(),
            RateLimitEntry {
                cooldown_until: Instant::now() + duration,
                last_backoff: duration,
            },
        );
        drop(entries);

        tracing::warn!(
            provider,
            cooldown_ms = duration.as_millis() as u64,
            "provider rate limited, cooling down"
        );
        duration
    }

    /// Forget the accumulated backoff after a successful call. The entry (and
    /// any cooldown timestamp) stays; only the multiplier resets.
    pub fn record_success(&self, provider: &str) {
        if let Some(entry) = self.lock().get_mut(provider)
            && !entry.last_backoff.is_zero()
        {
            tracing::debug!(provider, "resetting rate-limit backoff after success");
            entry.last_backoff = Duration::ZERO;
        }
    }

    /// Duration applied by the most recent rate-limit signal, if any is still on record.
    pub fn last_backoff(&self, provider: &str) -> Option<Duration> {
        self.lock()
            .get(provider)
            .map(|e| e.last_backoff)
            .filter(|d| !d.is_zero())
    }

    /// Names of providers currently cooling down, sorted.
    pub fn cooling_providers(&self) -> Vec<String> {
        let now = Instant::now();
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, e)| e.cooldown_until > now)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
