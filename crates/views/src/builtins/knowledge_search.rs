//! Ranked full-text search over the docs shelf.

use super::{query, records};
use crate::definition::{ParamKind, ParamSpec, Plan, QueryTemplate, ViewDefinition, ViewInput};
use serde_json::{Value, json};
use shelfwise_core::{CanonicalRecord, DocsPayload, Shelf, ShelfPayload};

pub const NAME: &str = "knowledge_search";
const DEFAULT_LIMIT: usize = 10;
/// Candidates fetched per requested result, so ranking has something to
/// choose from.
const OVERFETCH: usize = 5;
const MIN_CANDIDATES: usize = 50;
const MAX_CANDIDATES: usize = 500;

pub fn definition() -> ViewDefinition {
    ViewDefinition {
        name: NAME,
        description: "Search notes, files, and bookmarks; results ranked by relevance.",
        params: vec![
            ParamSpec {
                name: "query",
                kind: ParamKind::Text,
                required: true,
                default: None,
                description: "Text to search for",
            },
            ParamSpec {
                name: "limit",
                kind: ParamKind::PositiveInt,
                required: false,
                default: Some("10"),
                description: "Maximum number of results",
            },
        ],
        stages: vec![vec![QueryTemplate {
            key: "docs",
            shelf: Shelf::Docs,
            plan: plan_docs,
        }]],
        derive,
    }
}

fn limit(input: &ViewInput<'_>) -> usize {
    input
        .param("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(DEFAULT_LIMIT)
}

fn plan_docs(input: &ViewInput<'_>) -> Plan {
    let Some(text) = input.param("query") else {
        return Plan::Skip;
    };
    let candidates = (limit(input) * OVERFETCH)
        .clamp(MIN_CANDIDATES, MAX_CANDIDATES)
        .to_string();
    Plan::Run(query(&[("text_contains", text), ("limit", candidates.as_str())]))
}

/// Title hits outweigh tag hits, which outweigh body occurrences.
fn relevance(doc: &DocsPayload, needle: &str) -> u32 {
    let title = doc.title.to_lowercase();
    let mut score = 0;
    if title == needle {
        score += 20;
    } else if title.contains(needle) {
        score += 10;
    }
    if doc.tags.iter().any(|t| t.to_lowercase().contains(needle)) {
        score += 5;
    }
    if let Some(preview) = &doc.content_preview {
        let hits = preview.to_lowercase().matches(needle).count() as u32;
        score += hits.min(5);
    }
    score
}

fn derive(input: &ViewInput<'_>) -> Value {
    let needle = input.param("query").unwrap_or_default().to_lowercase();
    let mut ranked: Vec<(u32, &CanonicalRecord)> = records(input.output("docs"))
        .iter()
        .filter_map(|record| match &record.payload {
            ShelfPayload::Docs(doc) => Some((relevance(doc, &needle), record)),
            _ => None,
        })
        .collect();
    ranked.sort_by(|(sa, a), (sb, b)| {
        sb.cmp(sa)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let matched = ranked.len();
    let results: Vec<Value> = ranked
        .into_iter()
        .take(limit(input))
        .map(|(score, record)| json!({ "score": score, "document": record }))
        .collect();

    json!({
        "query": input.param("query"),
        "matched": matched,
        "results": results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::{composer, ctx, params};
    use shelfwise_connectors::FixtureConnector;
    use shelfwise_core::Error;

    fn notes() -> FixtureConnector {
        FixtureConnector::new("notes").with_records(
            Shelf::Docs,
            vec![
                json!({ "id": "d-1", "type": "note", "title": "Weekly sync", "content": "We discussed the roadmap and the roadmap risks." }),
                json!({ "id": "d-2", "type": "note", "title": "Roadmap", "content": "Milestones for the year." }),
                json!({ "id": "d-3", "type": "file", "title": "Q3 roadmap draft", "tags": ["planning"] }),
                json!({ "id": "d-4", "type": "bookmark", "title": "Rust book", "url": "https://doc.rust-lang.org/book/" }),
            ],
        )
    }

    fn result_ids(data: &Value) -> Vec<&str> {
        data["results"]
            .as_array()
            .map(|r| r.iter().filter_map(|r| r["document"]["id"].as_str()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn title_matches_rank_first() {
        let composer = composer(vec![notes()]);
        let result = composer
            .run_view(NAME, &params(&[("query", "roadmap")]), &ctx(NAME))
            .await
            .unwrap();

        assert_eq!(result.data["matched"], 3);
        assert_eq!(result_ids(&result.data), vec!["d-2", "d-3", "d-1"]);
        assert_eq!(result.data["results"][0]["score"], 20);
    }

    #[tokio::test]
    async fn limit_truncates_ranked_results() {
        let composer = composer(vec![notes()]);
        let result = composer
            .run_view(NAME, &params(&[("query", "roadmap"), ("limit", "1")]), &ctx(NAME))
            .await
            .unwrap();
        assert_eq!(result_ids(&result.data), vec!["d-2"]);
        assert_eq!(result.data["matched"], 3);
    }

    #[tokio::test]
    async fn query_is_required() {
        let composer = composer(vec![notes()]);
        let err = composer.run_view(NAME, &params(&[]), &ctx(NAME)).await.unwrap_err();
        match err {
            Error::InvalidParameter { parameter, .. } => assert_eq!(parameter, "query"),
            other => panic!("Expected InvalidParameter, got: {other:?}"),
        }

        let err = composer
            .run_view(NAME, &params(&[("query", "x"), ("limit", "many")]), &ctx(NAME))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref parameter, .. } if parameter == "limit"));
    }
}
