use std::time::Duration;

use crate::dispatch::{Provider, ProviderRequest, ProviderResult};
use crate::error::{ErrorClass, RelayError};
use crate::rate_limit::RateLimitTracker;

/// Bounded retry with exponential backoff: `min(base × 2^(retry−1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES)
    }
}

/// Call one provider, retrying transient failures with backoff.
///
/// - rate-limited: cool the provider down and return at once (no retry budget spent)
/// - transient: sleep and retry the same provider, up to `policy.max_retries` times
/// - fatal: return at once
///
/// Success resets the provider's stored rate-limit backoff.
pub async fn invoke_with_retry(
    name: &str,
    provider: &dyn Provider,
    req: &ProviderRequest,
    policy: &RetryPolicy,
    limits: &RateLimitTracker,
) -> Result<ProviderResult, RelayError> {
    let mut retries = 0u32;
    loop {
        let err = match provider.complete(req).await {
            Ok(result) => {
                limits.record_success(name);
                return Ok(result);
            }
            Err(e) => e,
        };

        match err.class() {
            ErrorClass::RateLimited => {
                let explicit = match &err {
                    RelayError::RateLimited { retry_after, .. } => *retry_after,
                    _ => None,
                };
                limits.mark_rate_limited(name, explicit);
                return Err(err);
            }
            ErrorClass::Transient if retries < policy.max_retries => {
                retries += 1;
                let delay = policy.backoff_delay(retries);
                tracing::warn!(
                    provider = name,
                    retry = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient provider error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            ErrorClass::Transient => {
                tracing::warn!(
                    provider = name,
                    retries,
                    error = %err,
                    "provider retries exhausted"
                );
                return Err(err);
            }
            ErrorClass::Fatal => {
                tracing::warn!(provider = name, error = %err, "fatal provider error");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(10);
        let delays: Vec<u64> = (1..=6).map(|r| p.backoff_delay(r).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn huge_retry_numbers_do_not_overflow() {
        let p = RetryPolicy::new(10);
        assert_eq!(p.backoff_delay(u32::MAX), Duration::from_millis(10_000));
    }
}
