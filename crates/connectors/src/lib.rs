//! Connector implementations and the registry for Shelfwise.
//!
//! All connectors implement the `shelfwise_core::Connector` trait. Vendor
//! API clients live out of tree; the built-in [`FixtureConnector`] serves
//! JSON documents for local runs and tests.

pub mod fixture;
pub mod registry;

pub use fixture::FixtureConnector;
pub use registry::{AuthReport, ConnectorRegistry, ConnectorSummary, build_from_config};
