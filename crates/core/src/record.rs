//! Canonical records: the uniform shape every shelf result takes.
//!
//! A [`CanonicalRecord`] is fixed metadata (id, timestamps, provenance,
//! confidence, sensitivity) plus a [`ShelfPayload`] tagged by shelf.
//! Serialized, the payload is flattened next to the metadata:
//!
//! ```json
//! { "id": "evt-1", "shelf": "calendar", "title": "Standup", "sensitivity": "S2", ... }
//! ```

use crate::shelf::Shelf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sensitivity tier. Ordered: `S1 < S2 < S3`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Sensitivity {
    /// Public or explicitly shareable.
    S1,
    /// Internal; the conservative default.
    #[default]
    S2,
    /// Confidential; never cached.
    S3,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sensitivity::S1 => f.write_str("S1"),
            Sensitivity::S2 => f.write_str("S2"),
            Sensitivity::S3 => f.write_str("S3"),
        }
    }
}

/// Provenance of a record. Set once by the normalizer, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourcePointer {
    /// The external system (e.g. `google_calendar`, `fixture`).
    pub system: String,
    /// The record's id inside that system.
    pub external_id: String,
    /// Deep link back to the source, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// SHA-256 (hex) of the native payload.
    pub hash: String,
}

impl SourcePointer {
    /// The key records are deduplicated on.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.system, &self.external_id)
    }
}

/// A normalized record on any shelf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub source: SourcePointer,
    /// `0.0..=1.0`; 1.0 for direct mappings.
    pub confidence: f32,
    pub sensitivity: Sensitivity,
    #[serde(flatten)]
    pub payload: ShelfPayload,
}

impl CanonicalRecord {
    pub fn shelf(&self) -> Shelf {
        self.payload.shelf()
    }
}

/// Shelf-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shelf", rename_all = "lowercase")]
pub enum ShelfPayload {
    Identity(IdentityPayload),
    Comms(CommsPayload),
    Calendar(CalendarPayload),
    Docs(DocsPayload),
    Tasks(TaskPayload),
}

impl ShelfPayload {
    pub fn shelf(&self) -> Shelf {
        match self {
            ShelfPayload::Identity(_) => Shelf::Identity,
            ShelfPayload::Comms(_) => Shelf::Comms,
            ShelfPayload::Calendar(_) => Shelf::Calendar,
            ShelfPayload::Docs(_) => Shelf::Docs,
            ShelfPayload::Tasks(_) => Shelf::Tasks,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: PersonName,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommsPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    /// accepted | declined | tentative | pending
    pub status: String,
    #[serde(default)]
    pub organizer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    pub status: String,
    #[serde(default)]
    pub calendar_name: Option<String>,
    #[serde(default)]
    pub recurrence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocsPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
