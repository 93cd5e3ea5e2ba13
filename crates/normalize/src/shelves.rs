//! Per-shelf mappings. Each returns the payload plus the free text the
//! sensitivity classifier should scan, or the reason the record is dropped.

use crate::{Draft, email_or_text, scalar_text};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use shelfwise_core::record::{
    Attendee, CalendarPayload, CommsPayload, DocsPayload, IdentityPayload, PersonName,
    TaskPayload,
};
use shelfwise_core::shelf::{
    ATTENDEE_STATUSES, CALENDAR_STATUSES, CALENDAR_TYPES, COMMS_TYPES, DOCS_TYPES,
    IDENTITY_TYPES, TASK_PRIORITIES, TASK_STATUSES, TASK_TYPES, canonical_enum,
};
use shelfwise_core::time::{Granularity, parse_iso, timestamp_from_value};
use shelfwise_core::{Shelf, ShelfPayload};

const SNIPPET_CHARS: usize = 200;
const PREVIEW_CHARS: usize = 280;

pub(crate) type Mapped = (ShelfPayload, Vec<String>);

pub(crate) fn map(shelf: Shelf, draft: &mut Draft<'_>) -> Result<Mapped, &'static str> {
    match shelf {
        Shelf::Identity => identity(draft),
        Shelf::Comms => comms(draft),
        Shelf::Calendar => calendar(draft),
        Shelf::Docs => docs(draft),
        Shelf::Tasks => tasks(draft),
    }
}

fn identity(d: &mut Draft<'_>) -> Result<Mapped, &'static str> {
    let kind = d.enumerated("type", IDENTITY_TYPES, "person");

    let mut emails = d.strings("emails");
    merge_unique(&mut emails, d.strings("email"));
    let mut phones = d.strings("phones");
    merge_unique(&mut phones, d.strings("phone"));

    let (full, display) = match d.get("name") {
        Some(Value::Object(name)) => (
            name.get("full").and_then(scalar_text),
            name.get("display").and_then(scalar_text),
        ),
        Some(other) => {
            let name = scalar_text(other);
            (name.clone(), name)
        }
        None => (d.text("full_name"), d.text("display_name")),
    };

    let display = match (display, &full) {
        (Some(display), _) => display,
        (None, Some(full)) => {
            d.infer();
            full.clone()
        }
        (None, None) => {
            let local = emails
                .first()
                .and_then(|e| e.split('@').next())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .ok_or("missing name")?;
            d.infer();
            local
        }
    };

    let title = d.text("title");
    let organization = d.text_any(&["organization", "company"]);
    let mut free_text = vec![display.clone()];
    free_text.extend(title.clone());

    Ok((
        ShelfPayload::Identity(IdentityPayload {
            kind,
            name: PersonName { full, display },
            emails,
            phones,
            organization,
            title,
            tags: d.strings("tags"),
        }),
        free_text,
    ))
}

fn comms(d: &mut Draft<'_>) -> Result<Mapped, &'static str> {
    let kind = d.enumerated("type", COMMS_TYPES, "email");

    let from = d
        .get("from")
        .or_else(|| d.get("sender"))
        .and_then(email_or_text)
        .ok_or("missing from")?;

    let timestamp = match d
        .time("timestamp")
        .or_else(|| d.time("date"))
        .or_else(|| d.time("sent_at"))
    {
        Some(ts) => ts,
        None => {
            let ts = d
                .time("updated_at")
                .or_else(|| d.time("created_at"))
                .ok_or("missing timestamp")?;
            d.infer();
            ts
        }
    };

    let subject = d.text("subject");
    let snippet = match d.text_any(&["snippet", "preview"]) {
        Some(s) => Some(s),
        None => d.text("body").map(|body| {
            d.infer();
            truncate(&body, SNIPPET_CHARS)
        }),
    };

    let mut free_text = Vec::new();
    free_text.extend(subject.clone());
    free_text.extend(snippet.clone());

    Ok((
        ShelfPayload::Comms(CommsPayload {
            kind,
            thread_id: d.text("thread_id"),
            from,
            to: d.strings("to"),
            subject,
            snippet,
            timestamp,
            is_read: d.flag("is_read").unwrap_or(false),
            labels: d.strings("labels"),
        }),
        free_text,
    ))
}

/// A point in time given either flat (`"start_time": "..."`) or nested the
/// way calendar APIs do (`"start": {"dateTime": ...}` / `{"date": ...}`).
fn moment(d: &Draft<'_>, flat: &str, nested: &str) -> Option<(DateTime<Utc>, Granularity)> {
    if let Some(value) = d.get(flat) {
        if let Some(parsed) = parse_moment(value) {
            return Some(parsed);
        }
    }
    match d.get(nested)? {
        Value::Object(obj) => {
            if let Some(ts) = obj.get("dateTime").and_then(timestamp_from_value) {
                return Some((ts, Granularity::Instant));
            }
            obj.get("date").and_then(parse_moment)
        }
        other => parse_moment(other),
    }
}

fn parse_moment(value: &Value) -> Option<(DateTime<Utc>, Granularity)> {
    match value {
        Value::String(s) => parse_iso(s),
        other => timestamp_from_value(other).map(|ts| (ts, Granularity::Instant)),
    }
}

fn calendar(d: &mut Draft<'_>) -> Result<Mapped, &'static str> {
    let kind = d.enumerated("type", CALENDAR_TYPES, "event");

    let title = match d.text_any(&["title", "summary"]) {
        Some(title) => title,
        None => {
            d.infer();
            "Untitled Event".to_string()
        }
    };

    let (start_time, start_granularity) = moment(d, "start_time", "start").ok_or("missing start_time")?;
    let all_day = d
        .flag("all_day")
        .unwrap_or(start_granularity == Granularity::Day);

    let end_time = match moment(d, "end_time", "end") {
        Some((end, _)) => end,
        None => {
            d.infer();
            if all_day {
                start_time + Duration::days(1)
            } else {
                start_time + Duration::hours(1)
            }
        }
    };

    let attendees = match d.get("attendees") {
        Some(Value::Array(items)) => items.iter().filter_map(attendee).collect(),
        _ => Vec::new(),
    };

    let status = d.enumerated("status", CALENDAR_STATUSES, "confirmed");
    let description = d.text("description");

    let mut free_text = vec![title.clone()];
    free_text.extend(description.clone());

    Ok((
        ShelfPayload::Calendar(CalendarPayload {
            kind,
            title,
            description,
            start_time,
            end_time,
            all_day,
            location: d.text("location"),
            attendees,
            status,
            calendar_name: d.text("calendar_name"),
            recurrence: d.strings("recurrence"),
        }),
        free_text,
    ))
}

fn attendee(value: &Value) -> Option<Attendee> {
    let email = email_or_text(value)?;
    let raw_status = value
        .get("responseStatus")
        .or_else(|| value.get("status"))
        .and_then(Value::as_str);
    let status = raw_status
        .and_then(|s| canonical_enum(ATTENDEE_STATUSES, s))
        .map(|(s, _)| s)
        .unwrap_or("pending")
        .to_string();
    Some(Attendee {
        email,
        status,
        organizer: value
            .get("organizer")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn docs(d: &mut Draft<'_>) -> Result<Mapped, &'static str> {
    let kind = d.enumerated("type", DOCS_TYPES, "note");
    let path = d.text("path");
    let url = d.text("url");

    let title = match d.text_any(&["title", "name"]) {
        Some(title) => title,
        None => {
            let derived = path
                .as_deref()
                .and_then(last_segment)
                .or_else(|| url.as_deref().and_then(last_segment))
                .or_else(|| {
                    d.text("content")
                        .and_then(|c| c.lines().next().map(|l| truncate(l.trim(), 80)))
                        .filter(|l| !l.is_empty())
                })
                .ok_or("missing title")?;
            d.infer();
            derived
        }
    };

    let content_preview = match d.text_any(&["content_preview", "preview", "summary"]) {
        Some(preview) => Some(preview),
        None => d.text("content").map(|content| {
            d.infer();
            truncate(&content, PREVIEW_CHARS)
        }),
    };

    let mut free_text = vec![title.clone()];
    free_text.extend(content_preview.clone());

    Ok((
        ShelfPayload::Docs(DocsPayload {
            kind,
            title,
            content_preview,
            url,
            path,
            tags: d.strings("tags"),
        }),
        free_text,
    ))
}

fn tasks(d: &mut Draft<'_>) -> Result<Mapped, &'static str> {
    let title = d.text_any(&["title", "name"]).ok_or("missing title")?;
    let kind = d.enumerated("type", TASK_TYPES, "task");
    let status = d.enumerated("status", TASK_STATUSES, "pending");
    let priority = d.enumerated("priority", TASK_PRIORITIES, "medium");

    let mut free_text = vec![title.clone()];
    free_text.extend(d.text("description"));

    Ok((
        ShelfPayload::Tasks(TaskPayload {
            kind,
            title,
            status,
            priority,
            due_date: d.time("due_date").or_else(|| d.time("due")),
            project: d.text("project"),
            assignee: d.text("assignee"),
            tags: d.strings("tags"),
        }),
        free_text,
    ))
}

fn merge_unique(into: &mut Vec<String>, more: Vec<String>) {
    for item in more {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// File name without extension from a path or URL.
fn last_segment(location: &str) -> Option<String> {
    let segment = location
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()?
        .split(['?', '#'])
        .next()?;
    let stem = match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => segment,
    };
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use crate::{NormalizationDropped, Normalizer};
    use serde_json::{Value, json};
    use shelfwise_core::{CanonicalRecord, NativeRecord, Shelf, ShelfPayload, SourceInfo};

    fn normalize(shelf: Shelf, data: Value) -> Result<CanonicalRecord, NormalizationDropped> {
        let source = SourceInfo {
            connector: "test".into(),
            system: "test".into(),
        };
        Normalizer::new().normalize(shelf, NativeRecord::from_value(data), &source)
    }

    #[test]
    fn google_style_calendar_event() {
        let record = normalize(
            Shelf::Calendar,
            json!({
                "id": "evt-1",
                "summary": "Offsite",
                "start": { "date": "2025-03-10" },
                "end": { "date": "2025-03-11" },
                "attendees": [
                    { "email": "ada@example.com", "responseStatus": "accepted", "organizer": true },
                    { "email": "bob@example.com", "responseStatus": "needsAction" },
                    { "displayName": "No Email" }
                ],
                "status": "confirmed",
                "type": "event"
            }),
        )
        .unwrap();

        match record.payload {
            ShelfPayload::Calendar(event) => {
                assert_eq!(event.title, "Offsite");
                assert!(event.all_day);
                assert_eq!(event.attendees.len(), 2);
                assert!(event.attendees[0].organizer);
                assert_eq!(event.attendees[1].status, "pending");
            }
            other => panic!("Expected calendar payload, got: {other:?}"),
        }
    }

    #[test]
    fn calendar_end_is_inferred() {
        let record = normalize(
            Shelf::Calendar,
            json!({ "id": "evt-2", "type": "event", "status": "confirmed", "title": "Call", "start_time": "2025-03-10T15:00:00Z" }),
        )
        .unwrap();
        assert!(record.confidence < 1.0);
        match record.payload {
            ShelfPayload::Calendar(event) => {
                assert!(!event.all_day);
                assert_eq!(event.end_time - event.start_time, chrono::Duration::hours(1));
            }
            other => panic!("Expected calendar payload, got: {other:?}"),
        }
    }

    #[test]
    fn calendar_without_start_is_dropped() {
        let err = normalize(Shelf::Calendar, json!({ "id": "evt-3", "title": "?" })).unwrap_err();
        assert_eq!(err.reason, "missing start_time");
    }

    #[test]
    fn untitled_event_default() {
        let record = normalize(
            Shelf::Calendar,
            json!({ "id": "evt-4", "start_time": "2025-03-10T15:00:00Z" }),
        )
        .unwrap();
        match record.payload {
            ShelfPayload::Calendar(event) => assert_eq!(event.title, "Untitled Event"),
            other => panic!("Expected calendar payload, got: {other:?}"),
        }
    }

    #[test]
    fn comms_sender_object_and_timestamp_fallback() {
        let record = normalize(
            Shelf::Comms,
            json!({
                "id": "m-1",
                "type": "email",
                "from": { "email": "ada@example.com", "name": "Ada" },
                "to": ["me@example.com"],
                "subject": "Lunch?",
                "updated_at": "2025-03-10T11:00:00Z"
            }),
        )
        .unwrap();
        match record.payload {
            ShelfPayload::Comms(msg) => {
                assert_eq!(msg.from, "ada@example.com");
                assert!(!msg.is_read);
                assert_eq!(msg.timestamp.to_rfc3339(), "2025-03-10T11:00:00+00:00");
            }
            other => panic!("Expected comms payload, got: {other:?}"),
        }
        assert!(record.confidence < 1.0);
    }

    #[test]
    fn comms_without_sender_is_dropped() {
        let err = normalize(
            Shelf::Comms,
            json!({ "id": "m-2", "timestamp": "2025-03-10T11:00:00Z" }),
        )
        .unwrap_err();
        assert_eq!(err.reason, "missing from");
    }

    #[test]
    fn identity_display_name_derived_from_email() {
        let record = normalize(
            Shelf::Identity,
            json!({ "id": "p-1", "type": "person", "email": "grace@example.com" }),
        )
        .unwrap();
        match record.payload {
            ShelfPayload::Identity(person) => {
                assert_eq!(person.name.display, "grace");
                assert_eq!(person.emails, vec!["grace@example.com"]);
            }
            other => panic!("Expected identity payload, got: {other:?}"),
        }
        assert!(record.confidence < 1.0);
    }

    #[test]
    fn identity_without_any_name_is_dropped() {
        let err = normalize(Shelf::Identity, json!({ "id": "p-2" })).unwrap_err();
        assert_eq!(err.reason, "missing name");
    }

    #[test]
    fn docs_title_from_path() {
        let record = normalize(
            Shelf::Docs,
            json!({ "id": "d-1", "type": "file", "path": "/notes/q3-plan.md" }),
        )
        .unwrap();
        match record.payload {
            ShelfPayload::Docs(doc) => assert_eq!(doc.title, "q3-plan"),
            other => panic!("Expected docs payload, got: {other:?}"),
        }
    }

    #[test]
    fn docs_preview_truncated_from_content() {
        let content = "x".repeat(1000);
        let record = normalize(
            Shelf::Docs,
            json!({ "id": "d-2", "type": "note", "title": "Long", "content": content }),
        )
        .unwrap();
        match record.payload {
            ShelfPayload::Docs(doc) => {
                assert_eq!(doc.content_preview.unwrap().chars().count(), 281);
            }
            other => panic!("Expected docs payload, got: {other:?}"),
        }
    }

    #[test]
    fn task_without_title_is_dropped() {
        let err = normalize(Shelf::Tasks, json!({ "id": "t-9", "status": "pending" })).unwrap_err();
        assert_eq!(err.reason, "missing title");
    }

    #[test]
    fn unknown_task_status_defaults_to_pending() {
        let record = normalize(
            Shelf::Tasks,
            json!({ "id": "t-3", "type": "task", "title": "x", "status": "someday", "priority": "low" }),
        )
        .unwrap();
        match record.payload {
            ShelfPayload::Tasks(task) => assert_eq!(task.status, "pending"),
            other => panic!("Expected tasks payload, got: {other:?}"),
        }
        assert!((record.confidence - 0.9).abs() < 1e-6);
    }
}
