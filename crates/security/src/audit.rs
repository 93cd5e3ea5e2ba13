//! Audit logging: structured records of data access.
//!
//! Every shelf query and view run is recorded with the calling agent, the
//! target, and the outcome. Entries are kept in a bounded in-memory buffer
//! and forwarded to any configured sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 1_000;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Agent id.
    pub actor: String,
    /// Session id.
    pub session: String,
    /// Shelf or view name.
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A shelf query was answered
    ShelfQueried {
        returned: usize,
        partial_failures: usize,
        cached: bool,
    },
    /// A composed view was run
    ViewRun { missing: Vec<String> },
    /// A scope check failed
    PermissionDenied { scope: String },
    /// Every connector for a shelf was rate limited
    RateLimited { retry_after_ms: u64 },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// Answered with some constituents missing
    Partial,
    Failure,
    Denied,
}

/// Where audit entries are written.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

pub struct AuditLogger {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create an audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_CAPACITY,
            sinks,
        }
    }

    /// Keep at most `capacity` entries in memory; the oldest go first.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        session: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            session: session.into(),
            target: target.into(),
            outcome,
            details,
        };

        {
            let mut buffer = self.buffer();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer().iter().cloned().collect()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.buffer()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    pub fn entries_for_session(&self, session: &str) -> Vec<AuditEntry> {
        self.buffer()
            .iter()
            .filter(|e| e.session == session)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.buffer().clear();
    }

    pub fn count(&self) -> usize {
        self.buffer().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            session = %entry.session,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queried(returned: usize) -> AuditEvent {
        AuditEvent::ShelfQueried {
            returned,
            partial_failures: 0,
            cached: false,
        }
    }

    #[test]
    fn log_and_retrieve_entries() {
        let logger = AuditLogger::new();
        logger.log(queried(3), "planner", "s1", "tasks", AuditOutcome::Success, None);
        logger.log(
            AuditEvent::PermissionDenied {
                scope: "read:comms".into(),
            },
            "intruder",
            "s2",
            "comms",
            AuditOutcome::Denied,
            Some("missing scope".into()),
        );

        assert_eq!(logger.count(), 2);
        let entries = logger.entries();
        assert_eq!(entries[0].actor, "planner");
        assert_eq!(entries[1].target, "comms");
    }

    #[test]
    fn filter_by_outcome_and_session() {
        let logger = AuditLogger::new();
        logger.log(queried(1), "a", "s1", "tasks", AuditOutcome::Success, None);
        logger.log(
            AuditEvent::ViewRun {
                missing: vec!["comms".into()],
            },
            "a",
            "s1",
            "today_briefing",
            AuditOutcome::Partial,
            None,
        );
        logger.log(queried(0), "b", "s2", "docs", AuditOutcome::Success, None);

        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Success).len(), 2);
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Partial).len(), 1);
        assert_eq!(logger.entries_for_session("s1").len(), 2);
    }

    #[test]
    fn buffer_is_bounded() {
        let logger = AuditLogger::new().with_capacity(2);
        for n in 0..5 {
            logger.log(queried(n), "a", "s", "tasks", AuditOutcome::Success, None);
        }
        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, queried(3));
        assert_eq!(entries[1].event, queried(4));
    }

    #[test]
    fn clear_entries() {
        let logger = AuditLogger::new();
        logger.log(queried(1), "a", "s", "tasks", AuditOutcome::Success, None);
        logger.clear();
        assert_eq!(logger.count(), 0);
    }

    #[test]
    fn audit_event_serialization() {
        let event = AuditEvent::RateLimited {
            retry_after_ms: 1500,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "rate_limited");
        assert_eq!(json["retry_after_ms"], 1500);
    }

    #[test]
    fn custom_sink_receives_events() {
        use std::sync::{Arc, Mutex};

        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.target.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);
        logger.log(queried(2), "a", "s", "calendar", AuditOutcome::Success, None);

        assert_eq!(*received.lock().unwrap(), vec!["calendar".to_string()]);
    }

    #[test]
    fn debug_format() {
        let debug_str = format!("{:?}", AuditLogger::new());
        assert!(debug_str.contains("AuditLogger"));
        assert!(debug_str.contains("entry_count"));
    }
}
