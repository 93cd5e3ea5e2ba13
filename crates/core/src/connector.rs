//! Connector trait: the abstraction over external data sources.
//!
//! A connector adapts one external system (a mail provider, a calendar, a
//! notes app) to one or more shelves. It receives a fully resolved query and
//! returns native records; normalization, post-filtering, merging and
//! sorting all happen downstream so connectors stay thin.

use crate::query::ResolvedQuery;
use crate::shelf::Shelf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connector-scoped failures. Recovered into partial failures by the
/// aggregator, never surfaced as top-level errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Shelf '{0}' is not supported")]
    UnsupportedShelf(Shelf),
}

/// A record as a connector returns it, before normalization.
///
/// `data` uses the canonical field names where the connector can map them;
/// anything missing or oddly shaped is the normalizer's problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeRecord {
    /// The record's id in the external system.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Deep link back to the source.
    #[serde(default)]
    pub url: Option<String>,
    pub data: serde_json::Value,
}

impl NativeRecord {
    pub fn new(external_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            external_id: Some(external_id.into()),
            url: None,
            data,
        }
    }

    /// Build from a bare JSON document, lifting `id` / `url` when present.
    pub fn from_value(data: serde_json::Value) -> Self {
        let external_id = data.get("id").and_then(scalar_to_string);
        let url = data
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Self {
            external_id,
            url,
            data,
        }
    }
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Where a batch of native records came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Registered connector name.
    pub connector: String,
    /// External system identifier written into `source.system`.
    pub system: String,
}

impl SourceInfo {
    pub fn of(connector: &dyn Connector) -> Self {
        Self {
            connector: connector.name().to_string(),
            system: connector.system().to_string(),
        }
    }
}

/// The core Connector trait.
///
/// Every source adapter implements this. The aggregator calls `fetch()`
/// without knowing which system sits behind it.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique registered name (e.g. "gmail", "fixture-tasks").
    fn name(&self) -> &str;

    /// External system identifier used in provenance. Defaults to the name.
    fn system(&self) -> &str {
        self.name()
    }

    /// Shelves this connector can answer.
    fn supported_shelves(&self) -> Vec<Shelf>;

    /// Filter fields the connector applies itself for `shelf`. Everything
    /// else is filtered after fetch.
    fn native_filters(&self, _shelf: Shelf) -> Vec<String> {
        Vec::new()
    }

    /// Establish or verify credentials.
    async fn authenticate(&self) -> std::result::Result<(), ConnectorError> {
        Ok(())
    }

    /// Fetch native records for a resolved query.
    async fn fetch(
        &self,
        shelf: Shelf,
        query: &ResolvedQuery,
    ) -> std::result::Result<Vec<NativeRecord>, ConnectorError>;
}
