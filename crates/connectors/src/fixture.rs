//! Fixture connector: serves records from a JSON document.
//!
//! The document maps shelf names to arrays of native records:
//!
//! ```json
//! { "tasks": [ { "id": "t-1", "title": "Ship", "status": "pending" } ],
//!   "comms": [ ... ] }
//! ```
//!
//! Used for local runs and tests; it exercises the full connector contract
//! (native filters, latency, failures) without any network.

use async_trait::async_trait;
use shelfwise_core::{Connector, ConnectorError, NativeRecord, ResolvedQuery, Shelf};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub struct FixtureConnector {
    name: String,
    system: String,
    records: HashMap<Shelf, Vec<serde_json::Value>>,
    shelves: Vec<Shelf>,
    native_filters: Vec<String>,
    latency: Duration,
    failure: Option<ConnectorError>,
    auth_failure: Option<String>,
}

impl FixtureConnector {
    /// An empty fixture serving no shelves.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            system: name.clone(),
            name,
            records: HashMap::new(),
            shelves: Vec::new(),
            native_filters: Vec::new(),
            latency: Duration::ZERO,
            failure: None,
            auth_failure: None,
        }
    }

    /// Build from a `{ "<shelf>": [records...] }` document.
    pub fn from_document(
        name: impl Into<String>,
        document: &serde_json::Value,
    ) -> Result<Self, ConnectorError> {
        let mut connector = Self::new(name);
        let map = document.as_object().ok_or_else(|| {
            ConnectorError::Malformed("fixture document must be a JSON object".into())
        })?;

        for (key, value) in map {
            let shelf: Shelf = key
                .parse()
                .map_err(|_| ConnectorError::Malformed(format!("unknown shelf '{key}' in fixture")))?;
            let records = value.as_array().ok_or_else(|| {
                ConnectorError::Malformed(format!("fixture shelf '{key}' must be an array"))
            })?;
            connector = connector.with_records(shelf, records.clone());
        }
        Ok(connector)
    }

    /// Load a fixture document from disk.
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self, ConnectorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::Unavailable(format!("cannot read fixture {}: {e}", path.display()))
        })?;
        let document: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            ConnectorError::Malformed(format!("invalid fixture {}: {e}", path.display()))
        })?;
        Self::from_document(name, &document)
    }

    /// Serve `records` on `shelf`.
    pub fn with_records(mut self, shelf: Shelf, records: Vec<serde_json::Value>) -> Self {
        if !self.shelves.contains(&shelf) {
            self.shelves.push(shelf);
        }
        self.records.entry(shelf).or_default().extend(records);
        self
    }

    /// Restrict (or extend) the served shelves.
    pub fn with_shelves(mut self, shelves: Vec<Shelf>) -> Self {
        self.shelves = shelves;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    /// Filter fields this fixture applies itself.
    pub fn with_native_filters(mut self, fields: Vec<String>) -> Self {
        self.native_filters = fields;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every fetch fail with `error` (after the configured latency).
    pub fn failing_with(mut self, error: ConnectorError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Make `authenticate()` fail.
    pub fn failing_auth(mut self, reason: impl Into<String>) -> Self {
        self.auth_failure = Some(reason.into());
        self
    }
}

#[async_trait]
impl Connector for FixtureConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn system(&self) -> &str {
        &self.system
    }

    fn supported_shelves(&self) -> Vec<Shelf> {
        self.shelves.clone()
    }

    fn native_filters(&self, shelf: Shelf) -> Vec<String> {
        self.native_filters
            .iter()
            .filter(|f| shelf.field(f).is_some())
            .cloned()
            .collect()
    }

    async fn authenticate(&self) -> Result<(), ConnectorError> {
        match &self.auth_failure {
            Some(reason) => Err(ConnectorError::Auth(reason.clone())),
            None => Ok(()),
        }
    }

    async fn fetch(
        &self,
        shelf: Shelf,
        query: &ResolvedQuery,
    ) -> Result<Vec<NativeRecord>, ConnectorError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        if !self.shelves.contains(&shelf) {
            return Err(ConnectorError::UnsupportedShelf(shelf));
        }

        let native = self.native_filters(shelf);
        let applied: Vec<_> = query
            .filters
            .iter()
            .filter(|(field, _)| native.contains(field))
            .collect();

        let records = self
            .records
            .get(&shelf)
            .map(|records| {
                records
                    .iter()
                    .filter(|doc| {
                        applied.iter().all(|(field, filter)| {
                            shelf
                                .field(field)
                                .is_some_and(|spec| shelfwise_query::matches(doc, spec, filter))
                        })
                    })
                    .cloned()
                    .map(NativeRecord::from_value)
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(connector = %self.name, shelf = %shelf, "Fixture fetch");
        Ok(records)
    }
}
