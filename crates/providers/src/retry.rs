//! Capped exponential backoff for rate-limited (429) requests.

use std::future::Future;
use std::time::Duration;

use folio_config::RetryConfig;
use folio_core::error::ProviderError;
use tracing::warn;

/// How many times to try a rate-limited request and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// A server hint wins over the exponential schedule; both are capped.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let delay = match retry_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let exp = attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(1u32 << exp)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Parse a `Retry-After` header value. Only the delta-seconds form is
/// understood; fractional values round up.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s.ceil() as u64)
}

/// Run `op` until it succeeds, fails with something other than
/// [`ProviderError::RateLimited`], or the attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
) -> std::result::Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Err(ProviderError::RateLimited {
                retry_after_secs,
                message,
            }) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt, retry_after_secs);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %message,
                    "Rate limited, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
