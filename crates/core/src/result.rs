//! Aggregated results and the partial failures they carry.

use crate::connector::ConnectorError;
use crate::record::{CanonicalRecord, Sensitivity};
use crate::shelf::Shelf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a connector contributed nothing to a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    AuthFailed,
    MalformedResponse,
    Unavailable,
    UnsupportedShelf,
    RateLimited { retry_after_ms: u64 },
    Cancelled,
}

impl From<&ConnectorError> for FailureReason {
    fn from(err: &ConnectorError) -> Self {
        match err {
            ConnectorError::Timeout(_) => FailureReason::Timeout,
            ConnectorError::Auth(_) => FailureReason::AuthFailed,
            ConnectorError::Malformed(_) => FailureReason::MalformedResponse,
            ConnectorError::Unavailable(_) => FailureReason::Unavailable,
            ConnectorError::UnsupportedShelf(_) => FailureReason::UnsupportedShelf,
        }
    }
}

/// One connector's failure within an otherwise successful aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub connector: String,
    pub reason: FailureReason,
    pub message: String,
}

impl PartialFailure {
    pub fn new(connector: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn from_error(connector: impl Into<String>, err: &ConnectorError) -> Self {
        Self::new(connector, FailureReason::from(err), err.to_string())
    }
}

/// The merged, sorted, paginated answer to one shelf query.
///
/// Built only by the aggregator; shared read-only as `Arc<AggregatedResult>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub shelf: Shelf,
    /// Records on the requested page, in final order.
    #[serde(rename = "items")]
    pub records: Vec<CanonicalRecord>,
    /// Size of the page.
    pub count: usize,
    /// Merged record count before pagination.
    pub total: usize,
    #[serde(default)]
    pub errors: Vec<PartialFailure>,
    /// Connectors that answered.
    #[serde(default)]
    pub succeeded: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl AggregatedResult {
    pub fn new(
        shelf: Shelf,
        records: Vec<CanonicalRecord>,
        total: usize,
        errors: Vec<PartialFailure>,
        succeeded: Vec<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            shelf,
            count: records.len(),
            records,
            total,
            errors,
            succeeded,
            generated_at,
        }
    }

    /// Highest sensitivity tier among the records, if any.
    pub fn max_sensitivity(&self) -> Option<Sensitivity> {
        self.records.iter().map(|r| r.sensitivity).max()
    }

    /// True when no connector answered and at least one failed.
    pub fn is_total_failure(&self) -> bool {
        self.succeeded.is_empty() && !self.errors.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }
}
