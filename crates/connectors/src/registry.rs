//! Connector registry: which connectors serve which shelves.
//!
//! Registration order is significant. It is the order fetch outcomes are
//! collected in, and therefore the tie-break order when duplicates merge.

use crate::fixture::FixtureConnector;
use serde::Serialize;
use shelfwise_config::AppConfig;
use shelfwise_core::{Connector, Error, Result, Shelf};
use std::sync::Arc;
use tracing::{info, warn};

/// Central registry holding every enabled connector.
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

/// Summary of a registered connector.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorSummary {
    pub name: String,
    pub system: String,
    pub shelves: Vec<Shelf>,
}

/// Outcome of authenticating one connector.
#[derive(Debug, Clone, Serialize)]
pub struct AuthReport {
    pub connector: String,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Register a connector. A second connector with the same name is
    /// rejected; returns whether the connector was added.
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> bool {
        let name = connector.name().to_string();
        if self.connectors.iter().any(|c| c.name() == name) {
            warn!(connector = %name, "Duplicate connector name, ignoring registration");
            return false;
        }
        info!(connector = %name, shelves = ?connector.supported_shelves(), "Registered connector");
        self.connectors.push(connector);
        true
    }

    /// Get a connector by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.name() == name).cloned()
    }

    /// Connectors serving `shelf`, in registration order.
    pub fn connectors_for(&self, shelf: Shelf) -> Vec<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .filter(|c| c.supported_shelves().contains(&shelf))
            .cloned()
            .collect()
    }

    /// All registered connector names, in registration order.
    pub fn list(&self) -> Vec<String> {
        self.connectors.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn describe(&self) -> Vec<ConnectorSummary> {
        self.connectors
            .iter()
            .map(|c| ConnectorSummary {
                name: c.name().to_string(),
                system: c.system().to_string(),
                shelves: c.supported_shelves(),
            })
            .collect()
    }

    /// Number of registered connectors.
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Authenticate every connector concurrently. Failures are reported,
    /// not fatal: a connector that cannot authenticate will surface as a
    /// partial failure when queried.
    pub async fn authenticate_all(&self) -> Vec<AuthReport> {
        let checks = self.connectors.iter().map(|connector| async move {
            let result = connector.authenticate().await;
            match &result {
                Ok(()) => info!(connector = %connector.name(), "Connector authenticated"),
                Err(e) => warn!(connector = %connector.name(), error = %e, "Connector authentication failed"),
            }
            AuthReport {
                connector: connector.name().to_string(),
                authenticated: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });
        futures::future::join_all(checks).await
    }
}

/// Build connectors from the enabled `[[connectors]]` entries.
pub fn build_from_config(config: &AppConfig) -> Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();

    for entry in config.enabled_connectors() {
        let mut connector = match &entry.path {
            Some(path) => FixtureConnector::from_file(&entry.name, path).map_err(|e| Error::Config {
                message: format!("connector '{}': {e}", entry.name),
            })?,
            None => FixtureConnector::new(&entry.name),
        };

        if !entry.shelves.is_empty() {
            connector = connector.with_shelves(entry.parsed_shelves());
        }
        if let Some(system) = &entry.system {
            connector = connector.with_system(system);
        }
        connector = connector
            .with_native_filters(entry.native_filters.clone())
            .with_latency(std::time::Duration::from_millis(entry.latency_ms));

        registry.register(Arc::new(connector));
    }

    let disabled = config.connectors.iter().filter(|c| !c.enabled).count();
    info!(
        registered = registry.len(),
        disabled, "Connector registry built"
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn fixture(name: &str, shelves: &[Shelf]) -> Arc<dyn Connector> {
        let mut connector = FixtureConnector::new(name);
        for shelf in shelves {
            connector = connector.with_records(*shelf, vec![]);
        }
        Arc::new(connector)
    }

    #[test]
    fn connectors_for_keeps_registration_order() {
        let mut registry = ConnectorRegistry::new();
        registry.register(fixture("gmail", &[Shelf::Comms, Shelf::Identity]));
        registry.register(fixture("slack", &[Shelf::Comms]));
        registry.register(fixture("gcal", &[Shelf::Calendar]));

        let names: Vec<String> = registry
            .connectors_for(Shelf::Comms)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["gmail", "slack"]);
        assert!(registry.connectors_for(Shelf::Docs).is_empty());
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = ConnectorRegistry::new();
        assert!(registry.register(fixture("gmail", &[Shelf::Comms])));
        assert!(!registry.register(fixture("gmail", &[Shelf::Identity])));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("gmail").unwrap().supported_shelves(),
            vec![Shelf::Comms]
        );
    }

    #[tokio::test]
    async fn authenticate_all_reports_each_connector() {
        let mut registry = ConnectorRegistry::new();
        registry.register(fixture("ok", &[Shelf::Tasks]));
        registry.register(Arc::new(
            FixtureConnector::new("broken").failing_auth("token expired"),
        ));

        let reports = registry.authenticate_all().await;
        assert_eq!(reports.len(), 2);
        assert!(reports[0].authenticated);
        assert!(!reports[1].authenticated);
        assert!(reports[1].error.as_deref().unwrap().contains("token expired"));
    }

    #[test]
    fn builds_enabled_connectors_from_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            json!({ "tasks": [ { "id": "t-1", "title": "Ship" } ] })
                .to_string()
                .as_bytes(),
        )
        .unwrap();

        let toml_str = format!(
            r#"
[[connectors]]
name = "todo"
path = "{}"
native_filters = ["status"]

[[connectors]]
name = "off"
enabled = false
shelves = ["docs"]
"#,
            file.path().display()
        );
        let config: AppConfig = toml::from_str(&toml_str).unwrap();

        let registry = build_from_config(&config).unwrap();
        assert_eq!(registry.list(), vec!["todo"]);
        let todo = registry.get("todo").unwrap();
        assert_eq!(todo.supported_shelves(), vec![Shelf::Tasks]);
        assert_eq!(todo.native_filters(Shelf::Tasks), vec!["status".to_string()]);
    }

    #[test]
    fn missing_fixture_file_is_config_error() {
        let config: AppConfig = toml::from_str(
            r#"
[[connectors]]
name = "ghost"
path = "/nonexistent/fixture.json"
"#,
        )
        .unwrap();
        let err = build_from_config(&config).err().unwrap();
        assert!(matches!(err, Error::Config { .. }));
    }
}
