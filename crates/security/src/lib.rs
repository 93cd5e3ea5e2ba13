//! Security module for Shelfwise: capability scopes and audit logging.
//!
//! Provides:
//! - **Scopes**: `read:<shelf>` / `tool:<view>` checks that run before any
//!   connector is contacted
//! - **Audit logging**: structured records of every query, view run,
//!   denial, and rate-limit rejection

pub mod audit;
pub mod scope;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use scope::{require_shelf, require_view, view_scope};
