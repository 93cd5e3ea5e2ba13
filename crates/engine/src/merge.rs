//! Post-collection stages: dedup, sort, page.
//!
//! These run only after every fetch has settled, so their output depends on
//! the records alone and never on completion order.

use chrono::{DateTime, Utc};
use shelfwise_core::{CanonicalRecord, FieldKind, Shelf, ShelfPayload, SortOrder, SortSpec};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Collapse records sharing `(source.system, source.external_id)`.
///
/// The higher-confidence record wins; on a tie the first seen is kept.
/// The survivor carries the highest sensitivity of the group.
pub fn dedup(records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut kept: Vec<CanonicalRecord> = Vec::with_capacity(records.len());

    for record in records {
        let key = (
            record.source.system.clone(),
            record.source.external_id.clone(),
        );
        match index.get(&key) {
            Some(&slot) => {
                let existing = &mut kept[slot];
                let sensitivity = existing.sensitivity.max(record.sensitivity);
                if record.confidence > existing.confidence {
                    *existing = record;
                }
                existing.sensitivity = sensitivity;
            }
            None => {
                index.insert(key, kept.len());
                kept.push(record);
            }
        }
    }
    kept
}

#[derive(Debug, PartialEq, PartialOrd)]
enum SortKey {
    Time(i64),
    Rank(usize),
    Flag(bool),
    Text(String),
}

/// A sortable field as stored on the typed record.
enum FieldValue<'a> {
    Time(DateTime<Utc>),
    Text(&'a str),
    Flag(bool),
}

fn text(value: &Option<String>) -> Option<FieldValue<'_>> {
    value.as_deref().map(FieldValue::Text)
}

/// Read `field` off the record, using the names of the shelf catalog.
fn field_value<'a>(record: &'a CanonicalRecord, field: &str) -> Option<FieldValue<'a>> {
    use FieldValue::{Flag, Text, Time};

    match field {
        "id" => return Some(Text(&record.id)),
        "created_at" => return record.created_at.map(Time),
        "updated_at" => return record.updated_at.map(Time),
        _ => {}
    }
    match (&record.payload, field) {
        (ShelfPayload::Identity(p), "type") => Some(Text(&p.kind)),
        (ShelfPayload::Identity(p), "name") => Some(Text(&p.name.display)),
        (ShelfPayload::Identity(p), "organization") => text(&p.organization),
        (ShelfPayload::Identity(p), "title") => text(&p.title),

        (ShelfPayload::Comms(p), "type") => Some(Text(&p.kind)),
        (ShelfPayload::Comms(p), "thread_id") => text(&p.thread_id),
        (ShelfPayload::Comms(p), "from") => Some(Text(&p.from)),
        (ShelfPayload::Comms(p), "subject") => text(&p.subject),
        (ShelfPayload::Comms(p), "snippet") => text(&p.snippet),
        (ShelfPayload::Comms(p), "timestamp") => Some(Time(p.timestamp)),
        (ShelfPayload::Comms(p), "is_read") => Some(Flag(p.is_read)),

        (ShelfPayload::Calendar(p), "type") => Some(Text(&p.kind)),
        (ShelfPayload::Calendar(p), "title") => Some(Text(&p.title)),
        (ShelfPayload::Calendar(p), "description") => text(&p.description),
        (ShelfPayload::Calendar(p), "start_time") => Some(Time(p.start_time)),
        (ShelfPayload::Calendar(p), "end_time") => Some(Time(p.end_time)),
        (ShelfPayload::Calendar(p), "all_day") => Some(Flag(p.all_day)),
        (ShelfPayload::Calendar(p), "location") => text(&p.location),
        (ShelfPayload::Calendar(p), "status") => Some(Text(&p.status)),
        (ShelfPayload::Calendar(p), "calendar_name") => text(&p.calendar_name),

        (ShelfPayload::Docs(p), "type") => Some(Text(&p.kind)),
        (ShelfPayload::Docs(p), "title") => Some(Text(&p.title)),
        (ShelfPayload::Docs(p), "content_preview") => text(&p.content_preview),
        (ShelfPayload::Docs(p), "url") => text(&p.url),
        (ShelfPayload::Docs(p), "path") => text(&p.path),

        (ShelfPayload::Tasks(p), "type") => Some(Text(&p.kind)),
        (ShelfPayload::Tasks(p), "title") => Some(Text(&p.title)),
        (ShelfPayload::Tasks(p), "status") => Some(Text(&p.status)),
        (ShelfPayload::Tasks(p), "priority") => Some(Text(&p.priority)),
        (ShelfPayload::Tasks(p), "due_date") => p.due_date.map(Time),
        (ShelfPayload::Tasks(p), "project") => text(&p.project),
        (ShelfPayload::Tasks(p), "assignee") => text(&p.assignee),

        _ => None,
    }
}

fn sort_key(record: &CanonicalRecord, shelf: Shelf, field: &str) -> Option<SortKey> {
    let spec = shelf.field(field)?;
    match (spec.kind, field_value(record, field)?) {
        (FieldKind::Date, FieldValue::Time(ts)) => Some(SortKey::Time(ts.timestamp_millis())),
        (FieldKind::Enum(vocabulary), FieldValue::Text(value)) => vocabulary
            .iter()
            .position(|v| v.eq_ignore_ascii_case(value))
            .map(SortKey::Rank),
        (FieldKind::Bool, FieldValue::Flag(flag)) => Some(SortKey::Flag(flag)),
        (FieldKind::Text | FieldKind::List, FieldValue::Text(value)) => {
            Some(SortKey::Text(value.to_lowercase()))
        }
        _ => None,
    }
}

/// Sort by `sort`, nulls last in either direction, ties by id ascending.
///
/// Keys are computed once per record before sorting.
pub fn sort(records: &mut Vec<CanonicalRecord>, shelf: Shelf, sort: &SortSpec) {
    let mut keyed: Vec<(Option<SortKey>, CanonicalRecord)> = records
        .drain(..)
        .map(|record| (sort_key(&record, shelf, &sort.field), record))
        .collect();

    keyed.sort_by(|(ka, a), (kb, b)| {
        let by_key = match (ka, kb) {
            (Some(x), Some(y)) => {
                let ord = x.partial_cmp(y).unwrap_or(Ordering::Equal);
                match sort.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_key.then_with(|| a.id.cmp(&b.id))
    });

    records.extend(keyed.into_iter().map(|(_, record)| record));
}

pub fn paginate(records: Vec<CanonicalRecord>, offset: usize, limit: usize) -> Vec<CanonicalRecord> {
    records.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use shelfwise_core::time::parse_timestamp;
    use shelfwise_core::{Sensitivity, ShelfPayload, SourcePointer, TaskPayload};

    fn task(id: &str, priority: &str, due: Option<&str>) -> CanonicalRecord {
        CanonicalRecord {
            id: id.into(),
            created_at: None,
            updated_at: None,
            source: SourcePointer {
                system: "fixture".into(),
                external_id: id.into(),
                url: None,
                hash: String::new(),
            },
            confidence: 1.0,
            sensitivity: Sensitivity::S2,
            payload: ShelfPayload::Tasks(TaskPayload {
                kind: "task".into(),
                title: id.into(),
                status: "pending".into(),
                priority: priority.into(),
                due_date: due.map(|d| parse_timestamp(d).unwrap()),
                project: None,
                assignee: None,
                tags: vec![],
            }),
        }
    }

    fn ids(records: &[CanonicalRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    fn spec(field: &str, order: SortOrder) -> SortSpec {
        SortSpec {
            field: field.into(),
            order,
        }
    }

    #[test]
    fn dedup_prefers_confidence_then_first_seen() {
        let mut low = task("t-1", "low", None);
        low.confidence = 0.6;
        low.sensitivity = Sensitivity::S3;
        let high = task("t-1", "high", None);
        let other = task("t-2", "low", None);
        let tie = task("t-2", "urgent", None);

        let merged = dedup(vec![low, high, other, tie]);
        assert_eq!(ids(&merged), vec!["t-1", "t-2"]);
        // winner of t-1 is the confident copy, but it inherits S3
        assert!((merged[0].confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(merged[0].sensitivity, Sensitivity::S3);
        match &merged[1].payload {
            ShelfPayload::Tasks(t) => assert_eq!(t.priority, "low"),
            other => panic!("Expected tasks payload, got: {other:?}"),
        }
    }

    #[test]
    fn dedup_keys_on_system_too() {
        let a = task("t-1", "low", None);
        let mut b = task("t-1", "low", None);
        b.source.system = "other".into();
        assert_eq!(dedup(vec![a, b]).len(), 2);
    }

    #[test]
    fn dates_sort_with_nulls_last_both_ways() {
        let mut records = vec![
            task("a", "low", None),
            task("b", "low", Some("2025-03-12")),
            task("c", "low", Some("2025-03-10")),
        ];
        sort(&mut records, Shelf::Tasks, &spec("due_date", SortOrder::Asc));
        assert_eq!(ids(&records), vec!["c", "b", "a"]);

        sort(&mut records, Shelf::Tasks, &spec("due_date", SortOrder::Desc));
        assert_eq!(ids(&records), vec!["b", "c", "a"]);
    }

    #[test]
    fn enums_sort_by_vocabulary_rank() {
        let mut records = vec![
            task("a", "medium", None),
            task("b", "urgent", None),
            task("c", "low", None),
        ];
        sort(&mut records, Shelf::Tasks, &spec("priority", SortOrder::Desc));
        assert_eq!(ids(&records), vec!["b", "a", "c"]);
    }

    #[test]
    fn text_fields_sort_case_insensitively() {
        let titled = |id: &str, title: &str| {
            let mut record = task(id, "low", None);
            if let ShelfPayload::Tasks(t) = &mut record.payload {
                t.title = title.into();
            }
            record
        };
        let mut records = vec![titled("1", "beta"), titled("2", "Alpha"), titled("3", "gamma")];
        sort(&mut records, Shelf::Tasks, &spec("title", SortOrder::Asc));
        assert_eq!(ids(&records), vec!["2", "1", "3"]);

        // a field the shelf does not have leaves only the id order
        sort(&mut records, Shelf::Tasks, &spec("start_time", SortOrder::Asc));
        assert_eq!(ids(&records), vec!["1", "2", "3"]);
    }

    #[test]
    fn ties_break_by_id() {
        let mut records = vec![
            task("z", "low", None),
            task("m", "low", None),
            task("a", "low", None),
        ];
        sort(&mut records, Shelf::Tasks, &SortSpec::default());
        assert_eq!(ids(&records), vec!["a", "m", "z"]);
    }

    #[test]
    fn paginate_after_sort() {
        let records: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| task(id, "low", None))
            .collect();
        assert_eq!(ids(&paginate(records.clone(), 1, 2)), vec!["b", "c"]);
        assert!(paginate(records, 10, 2).is_empty());
    }

    #[test]
    fn updated_at_default_sort() {
        let stamp = |s: &str| -> Option<DateTime<Utc>> { parse_timestamp(s) };
        let mut old = task("old", "low", None);
        old.updated_at = stamp("2025-01-01T00:00:00Z");
        let mut new = task("new", "low", None);
        new.updated_at = stamp("2025-02-01T00:00:00Z");

        let mut records = vec![old, new];
        sort(&mut records, Shelf::Tasks, &SortSpec::default());
        assert_eq!(ids(&records), vec!["new", "old"]);
    }
}
