//! # Shelfwise Core
//!
//! Domain types, traits, and error definitions for the Shelfwise
//! data-access mediator. This crate has **no runtime dependencies** beyond
//! serde/chrono. It defines the model every other crate builds against.
//!
//! ## Design Philosophy
//!
//! Every collaborator seam is a trait or a plain data type here:
//! - [`Connector`] is the contract external source adapters implement
//! - [`StructuredQuery`] / [`ResolvedQuery`] are what the parser produces
//!   and what connectors receive
//! - [`CanonicalRecord`] / [`AggregatedResult`] are what callers get back

pub mod agent;
pub mod connector;
pub mod error;
pub mod query;
pub mod record;
pub mod result;
pub mod shelf;
pub mod time;

// Re-export key types at crate root for ergonomics
pub use agent::AgentContext;
pub use connector::{Connector, ConnectorError, NativeRecord, SourceInfo};
pub use error::{Error, ErrorEnvelope, ErrorKind, Result};
pub use query::{
    DateExpr, DateUnit, FilterValue, RawParams, ResolvedFilter, ResolvedQuery, SortOrder, SortSpec,
    StructuredQuery,
};
pub use record::{
    Attendee, CalendarPayload, CanonicalRecord, CommsPayload, DocsPayload, IdentityPayload,
    PersonName, Sensitivity, ShelfPayload, SourcePointer, TaskPayload,
};
pub use result::{AggregatedResult, FailureReason, PartialFailure};
pub use shelf::{FieldKind, FieldSpec, Shelf};
