//! # Shelfwise Rate Limiter
//!
//! Token-bucket admission control. Every fetch is admitted against two
//! buckets: one per (agent, shelf) and one per agent across all shelves.
//! Both must admit, and tokens are only drawn when both do, so a denial
//! never costs the caller anything.
//!
//! Buckets are created lazily on first use and evicted once idle.

pub mod backoff;
pub mod bucket;

pub use backoff::BackoffPolicy;
pub use bucket::{Limit, TokenBucket};

use dashmap::DashMap;
use shelfwise_config::RateLimitConfig;
use shelfwise_core::{FailureReason, PartialFailure, Shelf};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// Why [`RateLimiter::acquire`] gave up.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AcquireError {
    #[error("rate limit exhausted for agent '{agent}' on {shelf} after {attempts} attempts")]
    Exhausted {
        agent: String,
        shelf: Shelf,
        attempts: u32,
        retry_after: Duration,
    },

    #[error("cancelled while waiting for a rate-limit token")]
    Cancelled,
}

impl AcquireError {
    /// The connector-scoped failure recorded when admission for
    /// `connector`'s fetch did not come through.
    pub fn into_failure(self, connector: &str) -> PartialFailure {
        let message = self.to_string();
        let reason = match self {
            AcquireError::Exhausted { retry_after, .. } => FailureReason::RateLimited {
                retry_after_ms: ceil_millis(retry_after),
            },
            AcquireError::Cancelled => FailureReason::Cancelled,
        };
        PartialFailure::new(connector, reason, message)
    }
}

fn ceil_millis(d: Duration) -> u64 {
    d.as_micros().div_ceil(1000) as u64
}

pub struct RateLimiter {
    shelf_limit: Limit,
    agent_limit: Limit,
    idle_after: Duration,
    shelf_buckets: DashMap<(String, Shelf), TokenBucket>,
    agent_buckets: DashMap<String, TokenBucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(shelf_limit: Limit, agent_limit: Limit) -> Self {
        Self {
            shelf_limit,
            agent_limit,
            idle_after: Duration::from_secs(600),
            shelf_buckets: DashMap::new(),
            agent_buckets: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Limit::new(config.requests_per_minute, config.burst),
            Limit::new(config.agent_requests_per_minute, config.agent_burst),
        )
        .with_idle_eviction(Duration::from_secs(config.idle_evict_secs))
    }

    pub fn with_idle_eviction(mut self, idle_after: Duration) -> Self {
        self.idle_after = idle_after;
        self
    }

    /// Check both buckets and draw one token from each if both admit.
    pub fn try_acquire(&self, agent: &str, shelf: Shelf) -> Admission {
        let now = Instant::now();

        // Lock order is always agent bucket, then shelf bucket.
        let mut agent_bucket = self
            .agent_buckets
            .entry(agent.to_string())
            .or_insert_with(|| TokenBucket::full(self.agent_limit, now));
        let mut shelf_bucket = self
            .shelf_buckets
            .entry((agent.to_string(), shelf))
            .or_insert_with(|| TokenBucket::full(self.shelf_limit, now));

        let wait = agent_bucket.wait_time(now).max(shelf_bucket.wait_time(now));
        if wait.is_zero() {
            agent_bucket.take();
            shelf_bucket.take();
            Admission::Granted
        } else {
            debug!(agent = %agent, shelf = %shelf, retry_after_ms = wait.as_millis() as u64, "Rate limit denied");
            Admission::Denied { retry_after: wait }
        }
    }

    /// Admission with bounded backoff. Sleeps between attempts for the
    /// longer of the bucket's retry hint and the policy delay (capped by the
    /// policy), and returns as soon as `cancel` fires.
    pub async fn acquire(
        &self,
        agent: &str,
        shelf: Shelf,
        policy: &BackoffPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), AcquireError> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let retry_after = match self.try_acquire(agent, shelf) {
                Admission::Granted => return Ok(()),
                Admission::Denied { retry_after } => retry_after,
            };

            if attempt >= attempts {
                warn!(
                    agent = %agent,
                    shelf = %shelf,
                    attempts,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exhausted"
                );
                return Err(AcquireError::Exhausted {
                    agent: agent.to_string(),
                    shelf,
                    attempts,
                    retry_after,
                });
            }

            let delay = policy.delay(attempt).max(retry_after).min(policy.max_delay);
            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Drop buckets untouched for longer than the idle window. Returns how
    /// many were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle = |bucket: &TokenBucket| now.saturating_duration_since(bucket.last_touched()) > self.idle_after;

        let before = self.bucket_count();
        self.shelf_buckets.retain(|_, bucket| !idle(bucket));
        self.agent_buckets.retain(|_, bucket| !idle(bucket));
        let evicted = before - self.bucket_count();
        if evicted > 0 {
            debug!(evicted, "Evicted idle rate-limit buckets");
        }
        evicted
    }

    /// Live buckets across both maps.
    pub fn bucket_count(&self) -> usize {
        self.shelf_buckets.len() + self.agent_buckets.len()
    }
}
