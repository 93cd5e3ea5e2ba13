//! # Shelfwise Query
//!
//! The query parser (raw parameter map → [`StructuredQuery`]) and the filter
//! matcher shared by connectors and the aggregator.
//!
//! [`StructuredQuery`]: shelfwise_core::StructuredQuery

pub mod matcher;
pub mod parser;

pub use matcher::{matches, matches_all, value_text};
pub use parser::{QueryParser, parse_date_expr, valid_keys};
