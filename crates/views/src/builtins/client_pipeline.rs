//! Client pipeline: who the clients are, what they sent, what is open.
//!
//! Identity resolves first; its emails parameterize the comms query, so
//! messages and tasks run in a second stage.

use super::{query, records, sent_from};
use crate::definition::{ParamKind, ParamSpec, Plan, QueryTemplate, ViewDefinition, ViewInput};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use shelfwise_core::{CanonicalRecord, IdentityPayload, Shelf, ShelfPayload};

pub const NAME: &str = "client_pipeline";
const OPEN_STATUSES: &str = "pending,active,blocked";
/// Without contact for this long a client needs attention.
const STALE_AFTER_DAYS: i64 = 14;

pub fn definition() -> ViewDefinition {
    ViewDefinition {
        name: NAME,
        description: "Clients from identity with their recent messages, open tasks that mention them, and an attention score.",
        params: vec![
            ParamSpec {
                name: "client_tag",
                kind: ParamKind::Text,
                required: false,
                default: Some("client"),
                description: "Identity tag that marks a client",
            },
            ParamSpec {
                name: "client_name",
                kind: ParamKind::Text,
                required: false,
                default: None,
                description: "Only clients whose name contains this text",
            },
        ],
        stages: vec![
            vec![QueryTemplate {
                key: "clients",
                shelf: Shelf::Identity,
                plan: plan_clients,
            }],
            vec![
                QueryTemplate {
                    key: "comms",
                    shelf: Shelf::Comms,
                    plan: plan_comms,
                },
                QueryTemplate {
                    key: "tasks",
                    shelf: Shelf::Tasks,
                    plan: plan_tasks,
                },
            ],
        ],
        derive,
    }
}

fn plan_clients(input: &ViewInput<'_>) -> Plan {
    let tag = input.param("client_tag").unwrap_or("client");
    let mut params = query(&[("tags", tag), ("sort_by", "name"), ("sort_order", "asc")]);
    if let Some(name) = input.param("client_name") {
        params.insert("name_contains".into(), name.into());
    }
    Plan::Run(params)
}

fn clients<'a>(input: &'a ViewInput<'_>) -> Option<Vec<&'a IdentityPayload>> {
    let result = input.output("clients")?;
    Some(
        result
            .records
            .iter()
            .filter_map(|r| match &r.payload {
                ShelfPayload::Identity(person) => Some(person),
                _ => None,
            })
            .collect(),
    )
}

fn plan_comms(input: &ViewInput<'_>) -> Plan {
    let Some(clients) = clients(input) else {
        return Plan::Blocked;
    };
    let emails: Vec<&str> = clients
        .iter()
        .flat_map(|c| c.emails.iter().map(String::as_str))
        .collect();
    if emails.is_empty() {
        return Plan::Skip;
    }
    let from = emails.join(",");
    Plan::Run(query(&[
        ("from", from.as_str()),
        ("sort_by", "timestamp"),
        ("sort_order", "desc"),
        ("limit", "500"),
    ]))
}

fn plan_tasks(input: &ViewInput<'_>) -> Plan {
    match clients(input) {
        None => Plan::Blocked,
        Some(clients) if clients.is_empty() => Plan::Skip,
        Some(_) => Plan::Run(query(&[
            ("status", OPEN_STATUSES),
            ("sort_by", "due_date"),
            ("sort_order", "asc"),
            ("limit", "500"),
        ])),
    }
}

#[derive(Debug, Serialize)]
struct ClientSummary<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    emails: &'a [String],
    messages: usize,
    unread: usize,
    last_contact: Option<DateTime<Utc>>,
    open_tasks: usize,
    overdue_tasks: usize,
    attention: u32,
    tasks: Vec<&'a str>,
}

fn sent_by(record: &CanonicalRecord, emails: &[String]) -> Option<(DateTime<Utc>, bool)> {
    let ShelfPayload::Comms(message) = &record.payload else {
        return None;
    };
    emails
        .iter()
        .any(|e| sent_from(&message.from, e))
        .then_some((message.timestamp, message.is_read))
}

fn mentions(record: &CanonicalRecord, client: &IdentityPayload) -> bool {
    let ShelfPayload::Tasks(task) = &record.payload else {
        return false;
    };
    let title = task.title.to_lowercase();
    let named = |text: &str| !text.trim().is_empty() && title.contains(&text.to_lowercase());
    named(&client.name.display)
        || client.organization.as_deref().is_some_and(named)
        || task
            .assignee
            .as_deref()
            .is_some_and(|a| client.emails.iter().any(|e| e.eq_ignore_ascii_case(a)))
}

/// Overdue work weighs most, then unread messages, then open tasks; a
/// client nobody has heard from in a while gets a bump.
fn attention(summary: &ClientSummary<'_>, now: DateTime<Utc>) -> u32 {
    let mut score = summary.overdue_tasks as u32 * 3 + summary.unread as u32 * 2 + summary.open_tasks as u32;
    match summary.last_contact {
        Some(at) if now - at > Duration::days(STALE_AFTER_DAYS) => score += 2,
        None => score += 1,
        Some(_) => {}
    }
    score
}

fn derive(input: &ViewInput<'_>) -> Value {
    let messages = records(input.output("comms"));
    let tasks = records(input.output("tasks"));

    let mut summaries: Vec<ClientSummary<'_>> = clients(input)
        .unwrap_or_default()
        .into_iter()
        .map(|client| {
            let contact: Vec<(DateTime<Utc>, bool)> =
                messages.iter().filter_map(|m| sent_by(m, &client.emails)).collect();
            let related: Vec<&CanonicalRecord> =
                tasks.iter().filter(|t| mentions(t, client)).collect();
            let overdue = related
                .iter()
                .filter(|r| match &r.payload {
                    ShelfPayload::Tasks(task) => task.due_date.is_some_and(|due| due < input.now),
                    _ => false,
                })
                .count();

            let mut summary = ClientSummary {
                name: &client.name.display,
                organization: client.organization.as_deref(),
                emails: &client.emails,
                messages: contact.len(),
                unread: contact.iter().filter(|(_, read)| !read).count(),
                last_contact: contact.iter().map(|(at, _)| *at).max(),
                open_tasks: related.len(),
                overdue_tasks: overdue,
                attention: 0,
                tasks: related.iter().map(|r| r.id.as_str()).collect(),
            };
            summary.attention = attention(&summary, input.now);
            summary
        })
        .collect();

    summaries.sort_by(|a, b| b.attention.cmp(&a.attention).then_with(|| a.name.cmp(&b.name)));

    json!({
        "client_tag": input.param("client_tag"),
        "clients": summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::{composer, ctx, params};
    use shelfwise_connectors::FixtureConnector;
    use shelfwise_core::ConnectorError;

    fn stamp(offset: Duration) -> String {
        (Utc::now() + offset).to_rfc3339()
    }

    fn contacts() -> FixtureConnector {
        FixtureConnector::new("contacts").with_records(
            Shelf::Identity,
            vec![
                json!({ "id": "p-1", "type": "person", "name": "Ada Lovelace", "emails": ["ada@analytical.io"], "organization": "Analytical", "tags": ["client"] }),
                json!({ "id": "p-2", "type": "person", "name": "Grace Hopper", "emails": ["grace@navy.mil"], "tags": ["client"] }),
                json!({ "id": "p-3", "type": "person", "name": "Linus", "emails": ["linus@kernel.org"], "tags": ["friend"] }),
            ],
        )
    }

    fn mail() -> FixtureConnector {
        FixtureConnector::new("mail").with_records(
            Shelf::Comms,
            vec![
                json!({ "id": "m-1", "type": "email", "from": "ada@analytical.io", "timestamp": stamp(-Duration::days(1)), "is_read": false }),
                json!({ "id": "m-2", "type": "email", "from": "ada@analytical.io", "timestamp": stamp(-Duration::days(3)), "is_read": true }),
                json!({ "id": "m-3", "type": "email", "from": "linus@kernel.org", "timestamp": stamp(-Duration::hours(2)), "is_read": false }),
            ],
        )
    }

    fn tracker() -> FixtureConnector {
        FixtureConnector::new("tracker").with_records(
            Shelf::Tasks,
            vec![
                json!({ "id": "t-1", "type": "task", "title": "Send Analytical the contract", "status": "active", "due_date": stamp(-Duration::days(1)) }),
                json!({ "id": "t-2", "type": "task", "title": "Call Grace Hopper", "status": "pending", "due_date": stamp(Duration::days(5)) }),
                json!({ "id": "t-3", "type": "task", "title": "Review Ada Lovelace notes", "status": "completed" }),
            ],
        )
    }

    fn client_names(data: &Value) -> Vec<&str> {
        data["clients"]
            .as_array()
            .map(|c| c.iter().filter_map(|c| c["name"].as_str()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn clients_are_scored_and_ranked() {
        let composer = composer(vec![contacts(), mail(), tracker()]);
        let result = composer.run_view(NAME, &params(&[]), &ctx(NAME)).await.unwrap();

        assert!(result.is_complete());
        assert_eq!(client_names(&result.data), vec!["Ada Lovelace", "Grace Hopper"]);

        let ada = &result.data["clients"][0];
        assert_eq!(ada["messages"], 2);
        assert_eq!(ada["unread"], 1);
        assert_eq!(ada["tasks"], json!(["t-1"]));
        assert_eq!(ada["overdue_tasks"], 1);
        // 1 overdue * 3 + 1 unread * 2 + 1 open
        assert_eq!(ada["attention"], 6);

        let grace = &result.data["clients"][1];
        assert_eq!(grace["messages"], 0);
        // 1 open + never contacted
        assert_eq!(grace["attention"], 2);
    }

    #[tokio::test]
    async fn name_filter_narrows_clients() {
        let composer = composer(vec![contacts(), mail(), tracker()]);
        let result = composer
            .run_view(NAME, &params(&[("client_name", "grace")]), &ctx(NAME))
            .await
            .unwrap();
        assert_eq!(client_names(&result.data), vec!["Grace Hopper"]);
    }

    #[tokio::test]
    async fn failed_identity_blocks_the_rest() {
        let contacts = FixtureConnector::new("contacts")
            .with_records(Shelf::Identity, vec![])
            .failing_with(ConnectorError::Auth("token expired".into()));
        let composer = composer(vec![contacts, mail(), tracker()]);
        let result = composer.run_view(NAME, &params(&[]), &ctx(NAME)).await.unwrap();

        assert_eq!(result.missing, vec!["identity", "comms", "tasks"]);
        assert_eq!(result.data["clients"], json!([]));
    }

    #[tokio::test]
    async fn no_clients_means_nothing_else_runs() {
        let composer = composer(vec![contacts(), mail(), tracker()]);
        let result = composer
            .run_view(NAME, &params(&[("client_tag", "investor")]), &ctx(NAME))
            .await
            .unwrap();
        assert!(result.is_complete());
        assert_eq!(result.data["clients"], json!([]));
        // only the identity lookup reached the mediator
        assert_eq!(composer_queries(&composer), 1);
    }

    fn message(from: &str) -> CanonicalRecord {
        serde_json::from_value(json!({
            "id": "m-9",
            "shelf": "comms",
            "type": "email",
            "from": from,
            "timestamp": "2025-03-10T12:00:00Z",
            "is_read": false,
            "source": { "system": "mail", "external_id": "m-9", "hash": "" },
            "confidence": 1.0,
            "sensitivity": "S2"
        }))
        .unwrap()
    }

    #[test]
    fn only_the_clients_own_address_counts() {
        let emails = vec!["ada@analytical.io".to_string()];
        assert!(sent_by(&message("Ada Lovelace <ADA@analytical.io>"), &emails).is_some());
        assert!(sent_by(&message("ada@analytical.io"), &emails).is_some());
        assert!(sent_by(&message("notada@analytical.io"), &emails).is_none());
        assert!(sent_by(&message("ada@analytical.io.evil.io"), &emails).is_none());
    }

    fn composer_queries(composer: &crate::composer::ViewComposer) -> usize {
        composer
            .mediator()
            .audit()
            .entries()
            .iter()
            .filter(|e| matches!(e.event, shelfwise_security::AuditEvent::ShelfQueried { .. }))
            .count()
    }
}
