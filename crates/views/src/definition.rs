//! Declarative view pipelines and the registry that holds them.
//!
//! A view is data: declared parameters, ordered stages of query templates,
//! and a pure derivation over the collected results. Adding a view never
//! touches the aggregator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shelfwise_core::{AggregatedResult, Error, RawParams, Result, Shelf};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Results gathered so far, keyed by template key.
pub type Outputs = BTreeMap<String, Arc<AggregatedResult>>;

/// What a template plans and a derivation reads.
pub struct ViewInput<'a> {
    /// Validated parameters with defaults filled in.
    pub params: &'a RawParams,
    pub outputs: &'a Outputs,
    pub now: DateTime<Utc>,
}

impl ViewInput<'_> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn output(&self, key: &str) -> Option<&AggregatedResult> {
        self.outputs.get(key).map(Arc::as_ref)
    }
}

/// How a template will run, decided once earlier stages have finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Run(RawParams),
    /// Not needed this time (e.g. nothing upstream to join on).
    Skip,
    /// An upstream constituent this one depends on is missing.
    Blocked,
}

pub type PlanFn = fn(&ViewInput<'_>) -> Plan;
pub type DeriveFn = fn(&ViewInput<'_>) -> serde_json::Value;

/// One constituent shelf query of a view.
#[derive(Clone)]
pub struct QueryTemplate {
    pub key: &'static str,
    pub shelf: Shelf,
    pub plan: PlanFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    PositiveInt,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
    pub description: &'static str,
}

#[derive(Clone)]
pub struct ViewDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// Templates within a stage run concurrently; stages run in order.
    pub stages: Vec<Vec<QueryTemplate>>,
    pub derive: DeriveFn,
}

impl ViewDefinition {
    /// Every shelf the view reads, in first-use order.
    pub fn shelves(&self) -> Vec<Shelf> {
        let mut shelves = Vec::new();
        for template in self.stages.iter().flatten() {
            if !shelves.contains(&template.shelf) {
                shelves.push(template.shelf);
            }
        }
        shelves
    }

    /// Check `raw` against the declared parameters and fill in defaults.
    pub fn bind_params(&self, raw: &RawParams) -> Result<RawParams> {
        if let Some(unknown) = raw.keys().find(|k| !self.params.iter().any(|p| p.name == k.as_str())) {
            let valid: Vec<&str> = self.params.iter().map(|p| p.name).collect();
            return Err(Error::invalid(
                unknown.clone(),
                format!(
                    "unknown parameter for view '{}'; valid parameters: {}",
                    self.name,
                    if valid.is_empty() { "(none)".to_string() } else { valid.join(", ") }
                ),
            ));
        }

        let mut bound = RawParams::new();
        for spec in &self.params {
            let value = match raw.get(spec.name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                Some(v) => v.to_string(),
                None => match (spec.default, spec.required) {
                    (Some(default), _) => default.to_string(),
                    (None, true) => {
                        return Err(Error::invalid(spec.name, "required parameter is missing"));
                    }
                    (None, false) => continue,
                },
            };
            if spec.kind == ParamKind::PositiveInt && !matches!(value.parse::<usize>(), Ok(n) if n > 0) {
                return Err(Error::invalid(
                    spec.name,
                    format!("expected a positive integer, got '{value}'"),
                ));
            }
            bound.insert(spec.name.to_string(), value);
        }
        Ok(bound)
    }
}

/// Summary of a registered view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewSummary {
    pub name: String,
    pub description: String,
    pub shelves: Vec<Shelf>,
    pub params: Vec<ParamSpec>,
}

/// Registry of views by name.
#[derive(Default)]
pub struct ViewRegistry {
    views: BTreeMap<String, ViewDefinition>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a view; a later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, view: ViewDefinition) {
        self.views.insert(view.name.to_string(), view);
    }

    pub fn get(&self, name: &str) -> Option<&ViewDefinition> {
        self.views.get(name)
    }

    /// Like [`get`](Self::get), but an unknown name is an `InvalidParameter`
    /// on `view`.
    pub fn lookup(&self, name: &str) -> Result<&ViewDefinition> {
        self.get(name).ok_or_else(|| {
            Error::invalid(
                "view",
                format!("unknown view '{name}'; valid views: {}", self.names().join(", ")),
            )
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.views.keys().map(String::as_str).collect()
    }

    pub fn describe(&self) -> Vec<ViewSummary> {
        self.views
            .values()
            .map(|v| ViewSummary {
                name: v.name.to_string(),
                description: v.description.to_string(),
                shelves: v.shelves(),
                params: v.params.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
