//! Shelves and their field catalogs.
//!
//! A shelf is one of five fixed logical data categories. Each shelf carries
//! a static catalog of the fields agents may filter and sort on, together
//! with the JSON paths where those fields live in both native (connector)
//! records and serialized canonical records. Both use one vocabulary.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five logical data categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shelf {
    Identity,
    Comms,
    Calendar,
    Docs,
    Tasks,
}

/// How a field's values are typed for filtering and sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text; exact, set and substring filters.
    Text,
    /// A closed vocabulary; values are validated and sort by declaration order.
    Enum(&'static [&'static str]),
    /// Literal `true` / `false`.
    Bool,
    /// A timestamp; supports range filters.
    Date,
    /// A list of strings; a filter matches if any element matches.
    List,
}

/// A filterable/sortable field of a shelf.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// JSON paths holding the value. Dots descend into objects; arrays are
    /// flattened. The first path is the canonical one and is what sorting
    /// reads; the rest are common native spellings that filters also try.
    pub paths: &'static [&'static str],
    pub sortable: bool,
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    paths: &'static [&'static str],
    sortable: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        paths,
        sortable,
    }
}

pub const IDENTITY_TYPES: &[&str] = &["person", "org", "role"];
pub const COMMS_TYPES: &[&str] = &["email", "message", "call"];
pub const CALENDAR_TYPES: &[&str] = &["event", "reminder", "block"];
pub const CALENDAR_STATUSES: &[&str] = &["confirmed", "tentative", "cancelled"];
pub const ATTENDEE_STATUSES: &[&str] = &["accepted", "declined", "tentative", "pending"];
pub const DOCS_TYPES: &[&str] = &["note", "file", "snippet", "bookmark"];
pub const TASK_TYPES: &[&str] = &["task", "project", "milestone"];
pub const TASK_STATUSES: &[&str] = &["pending", "active", "blocked", "completed", "cancelled"];
pub const TASK_PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];

static IDENTITY_FIELDS: &[FieldSpec] = &[
    field("id", FieldKind::Text, &["id"], true),
    field("type", FieldKind::Enum(IDENTITY_TYPES), &["type"], true),
    field(
        "name",
        FieldKind::Text,
        &["name.display", "name.full", "name", "display_name", "full_name"],
        true,
    ),
    field("email", FieldKind::List, &["emails", "email"], false),
    field("phone", FieldKind::List, &["phones", "phone"], false),
    field("organization", FieldKind::Text, &["organization"], true),
    field("title", FieldKind::Text, &["title"], false),
    field("tags", FieldKind::List, &["tags"], false),
    field("created_at", FieldKind::Date, &["created_at"], true),
    field("updated_at", FieldKind::Date, &["updated_at"], true),
];

static COMMS_FIELDS: &[FieldSpec] = &[
    field("id", FieldKind::Text, &["id"], true),
    field("type", FieldKind::Enum(COMMS_TYPES), &["type"], true),
    field("thread_id", FieldKind::Text, &["thread_id"], false),
    field("from", FieldKind::Text, &["from", "from.email", "sender"], true),
    field("to", FieldKind::List, &["to", "to.email"], false),
    field("subject", FieldKind::Text, &["subject"], true),
    field("snippet", FieldKind::Text, &["snippet"], false),
    field(
        "timestamp",
        FieldKind::Date,
        &["timestamp", "date", "sent_at"],
        true,
    ),
    field("is_read", FieldKind::Bool, &["is_read"], true),
    field("labels", FieldKind::List, &["labels"], false),
    field("created_at", FieldKind::Date, &["created_at"], true),
    field("updated_at", FieldKind::Date, &["updated_at"], true),
];

static CALENDAR_FIELDS: &[FieldSpec] = &[
    field("id", FieldKind::Text, &["id"], true),
    field("type", FieldKind::Enum(CALENDAR_TYPES), &["type"], true),
    field("title", FieldKind::Text, &["title", "summary"], true),
    field("description", FieldKind::Text, &["description"], false),
    field(
        "start_time",
        FieldKind::Date,
        &["start_time", "start.dateTime", "start.date"],
        true,
    ),
    field(
        "end_time",
        FieldKind::Date,
        &["end_time", "end.dateTime", "end.date"],
        true,
    ),
    field("all_day", FieldKind::Bool, &["all_day"], false),
    field("location", FieldKind::Text, &["location"], true),
    field("attendee", FieldKind::List, &["attendees.email"], false),
    field("status", FieldKind::Enum(CALENDAR_STATUSES), &["status"], true),
    field("calendar_name", FieldKind::Text, &["calendar_name"], true),
    field("created_at", FieldKind::Date, &["created_at"], true),
    field("updated_at", FieldKind::Date, &["updated_at"], true),
];

static DOCS_FIELDS: &[FieldSpec] = &[
    field("id", FieldKind::Text, &["id"], true),
    field("type", FieldKind::Enum(DOCS_TYPES), &["type"], true),
    field("title", FieldKind::Text, &["title"], true),
    field("content_preview", FieldKind::Text, &["content_preview"], false),
    field(
        "text",
        FieldKind::Text,
        &["title", "content_preview", "tags", "content"],
        false,
    ),
    field("url", FieldKind::Text, &["url"], false),
    field("path", FieldKind::Text, &["path"], true),
    field("tags", FieldKind::List, &["tags"], false),
    field("created_at", FieldKind::Date, &["created_at"], true),
    field("updated_at", FieldKind::Date, &["updated_at"], true),
];

static TASKS_FIELDS: &[FieldSpec] = &[
    field("id", FieldKind::Text, &["id"], true),
    field("type", FieldKind::Enum(TASK_TYPES), &["type"], true),
    field("title", FieldKind::Text, &["title"], true),
    field("status", FieldKind::Enum(TASK_STATUSES), &["status"], true),
    field("priority", FieldKind::Enum(TASK_PRIORITIES), &["priority"], true),
    field("due_date", FieldKind::Date, &["due_date", "due"], true),
    field("project", FieldKind::Text, &["project"], true),
    field("assignee", FieldKind::Text, &["assignee"], true),
    field("tags", FieldKind::List, &["tags"], false),
    field("created_at", FieldKind::Date, &["created_at"], true),
    field("updated_at", FieldKind::Date, &["updated_at"], true),
];

impl Shelf {
    /// Every shelf, in declaration order.
    pub const ALL: [Shelf; 5] = [
        Shelf::Identity,
        Shelf::Comms,
        Shelf::Calendar,
        Shelf::Docs,
        Shelf::Tasks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Shelf::Identity => "identity",
            Shelf::Comms => "comms",
            Shelf::Calendar => "calendar",
            Shelf::Docs => "docs",
            Shelf::Tasks => "tasks",
        }
    }

    /// The field catalog for this shelf.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Shelf::Identity => IDENTITY_FIELDS,
            Shelf::Comms => COMMS_FIELDS,
            Shelf::Calendar => CALENDAR_FIELDS,
            Shelf::Docs => DOCS_FIELDS,
            Shelf::Tasks => TASKS_FIELDS,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Shelf-specific parameter aliases, mapped to their canonical key.
    pub fn aliases(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Shelf::Calendar => &[
                ("start_date", "start_time_after"),
                ("end_date", "start_time_before"),
            ],
            Shelf::Comms => &[("since", "timestamp_after"), ("until", "timestamp_before")],
            Shelf::Docs => &[("query", "text_contains")],
            Shelf::Identity | Shelf::Tasks => &[],
        }
    }

    /// The capability scope required to read this shelf.
    pub fn read_scope(&self) -> String {
        format!("read:{}", self.as_str())
    }
}

impl fmt::Display for Shelf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shelf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Shelf::ALL
            .into_iter()
            .find(|shelf| shelf.as_str() == s)
            .ok_or_else(|| {
                Error::invalid(
                    "shelf",
                    format!(
                        "unknown shelf '{s}'; valid shelves: identity, comms, calendar, docs, tasks"
                    ),
                )
            })
    }
}

/// Synonyms accepted for enumerated values, mapped to their canonical form.
const ENUM_SYNONYMS: &[(&str, &str)] = &[
    ("done", "completed"),
    ("complete", "completed"),
    ("in progress", "active"),
    ("in_progress", "active"),
    ("in-progress", "active"),
    ("todo", "pending"),
    ("open", "pending"),
    ("canceled", "cancelled"),
    ("needsaction", "pending"),
    ("needs_action", "pending"),
    ("critical", "urgent"),
    ("normal", "medium"),
];

/// Map a raw value onto `vocabulary`, case-insensitively.
///
/// Returns the canonical value and whether a synonym had to be used.
pub fn canonical_enum(vocabulary: &[&'static str], raw: &str) -> Option<(&'static str, bool)> {
    let lowered = raw.trim().to_ascii_lowercase();
    if let Some(value) = vocabulary.iter().find(|v| **v == lowered) {
        return Some((*value, false));
    }
    ENUM_SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == lowered)
        .and_then(|(_, target)| vocabulary.iter().find(|v| *v == target))
        .map(|value| (*value, true))
}

/// Collect every value found at a dotted JSON path, flattening arrays.
pub fn values_at<'a>(doc: &'a serde_json::Value, path: &str) -> Vec<&'a serde_json::Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                serde_json::Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                serde_json::Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.get(segment) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    // Flatten a terminal array so list fields yield their elements.
    current
        .into_iter()
        .flat_map(|v| match v {
            serde_json::Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .filter(|v| !v.is_null())
        .collect()
}
