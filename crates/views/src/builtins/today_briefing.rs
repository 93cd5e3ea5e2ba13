//! Today's briefing: calendar, due tasks, unread messages.

use super::{query, records, sent_from};
use crate::definition::{Plan, QueryTemplate, ViewDefinition, ViewInput};
use serde_json::{Value, json};
use shelfwise_core::{CanonicalRecord, Shelf, ShelfPayload};
use std::collections::HashSet;

pub const NAME: &str = "today_briefing";
const UNREAD_LIMIT: &str = "50";

pub fn definition() -> ViewDefinition {
    ViewDefinition {
        name: NAME,
        description: "Today's calendar, open tasks due by end of day, and unread messages with VIP senders first.",
        params: vec![],
        stages: vec![vec![
            QueryTemplate {
                key: "calendar",
                shelf: Shelf::Calendar,
                plan: plan_calendar,
            },
            QueryTemplate {
                key: "tasks",
                shelf: Shelf::Tasks,
                plan: plan_tasks,
            },
            QueryTemplate {
                key: "comms",
                shelf: Shelf::Comms,
                plan: plan_comms,
            },
            QueryTemplate {
                key: "vips",
                shelf: Shelf::Identity,
                plan: plan_vips,
            },
        ]],
        derive,
    }
}

fn plan_calendar(_: &ViewInput<'_>) -> Plan {
    Plan::Run(query(&[
        ("start_time", "today"),
        ("sort_by", "start_time"),
        ("sort_order", "asc"),
    ]))
}

fn plan_tasks(_: &ViewInput<'_>) -> Plan {
    Plan::Run(query(&[
        ("due_date_before", "today"),
        ("status", "pending,active,blocked"),
        ("sort_by", "due_date"),
        ("sort_order", "asc"),
    ]))
}

fn plan_comms(_: &ViewInput<'_>) -> Plan {
    Plan::Run(query(&[
        ("is_read", "false"),
        ("sort_by", "timestamp"),
        ("sort_order", "desc"),
        ("limit", UNREAD_LIMIT),
    ]))
}

fn plan_vips(_: &ViewInput<'_>) -> Plan {
    Plan::Run(query(&[("tags", "vip")]))
}

fn vip_emails(input: &ViewInput<'_>) -> HashSet<String> {
    records(input.output("vips"))
        .iter()
        .filter_map(|r| match &r.payload {
            ShelfPayload::Identity(person) => Some(person.emails.iter()),
            _ => None,
        })
        .flatten()
        .map(|email| email.to_lowercase())
        .collect()
}

fn is_vip(record: &CanonicalRecord, vips: &HashSet<String>) -> bool {
    let ShelfPayload::Comms(message) = &record.payload else {
        return false;
    };
    if message.labels.iter().any(|l| l.eq_ignore_ascii_case("vip")) {
        return true;
    }
    vips.iter().any(|email| sent_from(&message.from, email))
}

/// Unread messages, VIP senders first, then newest first, then by id.
fn rank_unread<'a>(unread: &'a [CanonicalRecord], vips: &HashSet<String>) -> Vec<(&'a CanonicalRecord, bool)> {
    let mut ranked: Vec<(&CanonicalRecord, bool)> =
        unread.iter().map(|r| (r, is_vip(r, vips))).collect();
    ranked.sort_by(|(a, a_vip), (b, b_vip)| {
        b_vip
            .cmp(a_vip)
            .then_with(|| timestamp(b).cmp(&timestamp(a)))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked
}

fn timestamp(record: &CanonicalRecord) -> Option<chrono::DateTime<chrono::Utc>> {
    match &record.payload {
        ShelfPayload::Comms(message) => Some(message.timestamp),
        _ => None,
    }
}

fn derive(input: &ViewInput<'_>) -> Value {
    let events = records(input.output("calendar"));
    let tasks = records(input.output("tasks"));
    let vips = vip_emails(input);
    let unread = rank_unread(records(input.output("comms")), &vips);

    let overdue = tasks
        .iter()
        .filter(|r| match &r.payload {
            ShelfPayload::Tasks(task) => task.due_date.is_some_and(|due| due < input.now),
            _ => false,
        })
        .count();
    let vip_unread = unread.iter().filter(|(_, vip)| *vip).count();

    let unread: Vec<Value> = unread
        .into_iter()
        .map(|(record, vip)| json!({ "vip": vip, "message": record }))
        .collect();

    json!({
        "date": input.now.date_naive().to_string(),
        "summary": {
            "events": events.len(),
            "tasks_due": tasks.len(),
            "overdue": overdue,
            "unread": unread.len(),
            "vip_unread": vip_unread,
        },
        "calendar": events,
        "tasks": tasks,
        "unread": unread,
    })
}
