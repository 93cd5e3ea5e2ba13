//! Built-in views.
//!
//! - `today_briefing`: today's calendar, open tasks due by end of day, and
//!   unread messages with VIP senders first
//! - `client_pipeline`: clients from identity, then their messages and the
//!   open tasks that mention them
//! - `knowledge_search`: ranked full-text search over docs

pub mod client_pipeline;
pub mod knowledge_search;
pub mod today_briefing;

use crate::definition::ViewRegistry;
use shelfwise_core::{AggregatedResult, CanonicalRecord, RawParams};

/// Create a view registry with all built-in views.
pub fn default_registry() -> ViewRegistry {
    let mut registry = ViewRegistry::new();
    registry.register(today_briefing::definition());
    registry.register(client_pipeline::definition());
    registry.register(knowledge_search::definition());
    registry
}

pub(crate) fn query(pairs: &[(&str, &str)]) -> RawParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub(crate) fn records(result: Option<&AggregatedResult>) -> &[CanonicalRecord] {
    result.map(|r| r.records.as_slice()).unwrap_or_default()
}

/// The bare address of a sender written as `addr` or `Name <addr>`.
pub(crate) fn address(sender: &str) -> &str {
    let sender = sender.trim();
    match (sender.rfind('<'), sender.rfind('>')) {
        (Some(open), Some(close)) if open < close => sender[open + 1..close].trim(),
        _ => sender,
    }
}

/// Whether `sender` is exactly `email`, ignoring ASCII case.
pub(crate) fn sent_from(sender: &str, email: &str) -> bool {
    address(sender).eq_ignore_ascii_case(email.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_address_is_extracted() {
        assert_eq!(address("Ada Lovelace <ada@analytical.io>"), "ada@analytical.io");
        assert_eq!(address("  ada@analytical.io "), "ada@analytical.io");
        assert_eq!(address("\"Ops <ops>\" <ops@example.com>"), "ops@example.com");
    }

    #[test]
    fn lookalike_senders_do_not_match() {
        assert!(sent_from("CEO <Ceo@Example.com>", "ceo@example.com"));
        assert!(!sent_from("notceo@example.com", "ceo@example.com"));
        assert!(!sent_from("ceo@example.com.evil.io", "ceo@example.com"));
        assert!(!sent_from("CEO <ceo@example.com.evil.io>", "ceo@example.com"));
    }

    #[test]
    fn registry_holds_every_builtin() {
        let registry = default_registry();
        assert_eq!(
            registry.names(),
            vec!["client_pipeline", "knowledge_search", "today_briefing"]
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::composer::ViewComposer;
    use shelfwise_connectors::{ConnectorRegistry, FixtureConnector};
    use shelfwise_core::{AgentContext, RawParams};
    use shelfwise_engine::{Aggregator, Mediator};
    use std::sync::Arc;

    pub fn composer(connectors: Vec<FixtureConnector>) -> ViewComposer {
        let mut registry = ConnectorRegistry::new();
        for connector in connectors {
            registry.register(Arc::new(connector));
        }
        let mediator = Mediator::new(Arc::new(Aggregator::new(Arc::new(registry))));
        ViewComposer::with_builtins(Arc::new(mediator))
    }

    pub fn ctx(view: &str) -> AgentContext {
        AgentContext::new("assistant", "s-1").with_scope(format!("tool:{view}"))
    }

    pub fn params(pairs: &[(&str, &str)]) -> RawParams {
        super::query(pairs)
    }
}
