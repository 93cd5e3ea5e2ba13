//! # Shelfwise Engine
//!
//! The [`Aggregator`] fans a resolved query out to every connector serving
//! the shelf, recovers connector failures into partial failures, and merges
//! what comes back. The [`Mediator`] puts parsing, scope checks, caching,
//! and audit around it.

pub mod aggregator;
pub mod mediator;
pub mod merge;

pub use aggregator::{Aggregator, ResolveOptions};
pub use mediator::Mediator;
