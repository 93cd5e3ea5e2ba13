//! # Shelfwise Cache
//!
//! Short-lived, session-scoped cache of aggregated results keyed by
//! [`Fingerprint`]. Entries are immutable `Arc`s: they are created once,
//! expire by TTL or session teardown, and are never updated in place.
//!
//! Results carrying S3 records are never stored.

pub mod fingerprint;

pub use fingerprint::Fingerprint;

use dashmap::DashMap;
use serde::Serialize;
use shelfwise_config::CacheConfig;
use shelfwise_core::{AggregatedResult, Sensitivity};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    result: Arc<AggregatedResult>,
    created_at: Instant,
    ttl: Duration,
    session: String,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// `put` calls refused because the result held S3 records.
    pub bypassed: u64,
    pub expired: u64,
}

pub struct ResultCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    enabled: bool,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    bypassed: AtomicU64,
    expired: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            enabled: true,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let mut cache = Self::new(config.ttl());
        cache.enabled = config.enabled;
        cache
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a live entry. Expired entries are removed on the way out.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<AggregatedResult>> {
        let now = Instant::now();
        match self.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint, "Cache hit");
                return Some(Arc::clone(&entry.result));
            }
            Some(_) => {}
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        // the read guard is released before removal
        if self
            .entries
            .remove_if(fingerprint, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint, "Cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `result` for `session`. Returns whether it was stored: results
    /// holding S3 records and disabled caches are silent no-ops.
    pub fn put(
        &self,
        fingerprint: Fingerprint,
        result: Arc<AggregatedResult>,
        ttl: Duration,
        session: &str,
    ) -> bool {
        if !self.enabled || ttl.is_zero() {
            return false;
        }
        if result.max_sensitivity() == Some(Sensitivity::S3) {
            self.bypassed.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fingerprint, shelf = %result.shelf, "Cache bypass: result holds S3 records");
            return false;
        }

        debug!(fingerprint = %fingerprint, shelf = %result.shelf, ttl_secs = ttl.as_secs(), "Cache insert");
        self.entries.insert(
            fingerprint,
            CacheEntry {
                result,
                created_at: Instant::now(),
                ttl,
                session: session.to_string(),
            },
        );
        self.inserts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop every entry belonging to `session`. Returns how many went.
    pub fn teardown_session(&self, session: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.session != session);
        let removed = before.saturating_sub(self.entries.len());
        debug!(session = %session, removed, "Session cache torn down");
        removed
    }

    /// Drop every expired entry. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
