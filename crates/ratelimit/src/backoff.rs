//! Bounded exponential backoff with jitter.

use shelfwise_config::RateLimitConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// No retries: the first denial is terminal.
    pub fn no_retry() -> Self {
        Self {
            base: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Delay after the `attempt`-th denial (1-based): `base * 2^(attempt-1)`
    /// plus up to 25% jitter, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base.saturating_mul(1 << exponent);
        let jitter_cap = backoff.as_millis() as u64 / 4;
        let jitter = if jitter_cap > 0 {
            use rand::Rng;
            rand::rng().random_range(0..=jitter_cap)
        } else {
            0
        };
        (backoff + Duration::from_millis(jitter)).min(self.max_delay)
    }
}
