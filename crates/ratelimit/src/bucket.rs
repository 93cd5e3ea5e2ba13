//! Continuous-refill token bucket.

use tokio::time::{Duration, Instant};

/// Sustained rate and burst capacity of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub per_minute: u32,
    pub burst: u32,
}

impl Limit {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self { per_minute, burst }
    }

    fn refill_per_sec(&self) -> f64 {
        f64::from(self.per_minute) / 60.0
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    limit: Limit,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket that starts at capacity.
    pub fn full(limit: Limit, now: Instant) -> Self {
        Self {
            limit,
            tokens: f64::from(limit.burst),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.limit.refill_per_sec()).min(f64::from(self.limit.burst));
        self.last_refill = now;
    }

    /// Time until one token is available, rounded up to whole milliseconds.
    /// Zero when a token is available now.
    pub fn wait_time(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let rate = self.limit.refill_per_sec();
        if rate <= 0.0 {
            return Duration::from_secs(60);
        }
        let millis = ((1.0 - self.tokens) / rate * 1000.0).ceil() as u64;
        Duration::from_millis(millis.max(1))
    }

    /// Consume one token. Callers check [`wait_time`](Self::wait_time) first.
    pub fn take(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// When the bucket was last refilled or drawn from.
    pub fn last_touched(&self) -> Instant {
        self.last_refill
    }
}
