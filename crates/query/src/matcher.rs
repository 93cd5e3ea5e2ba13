//! Evaluates resolved filters against JSON documents.
//!
//! Connectors use this for filters they apply themselves; the aggregator
//! uses it for everything else. One implementation keeps filtering
//! identical regardless of which connector served the data.

use serde_json::Value;
use shelfwise_core::shelf::{canonical_enum, values_at};
use shelfwise_core::time::timestamp_from_value;
use shelfwise_core::{FieldKind, FieldSpec, ResolvedFilter, Shelf};

/// Whether `doc` satisfies `filter` on the field described by `spec`.
///
/// A field with no value never matches.
pub fn matches(doc: &Value, spec: &FieldSpec, filter: &ResolvedFilter) -> bool {
    let values: Vec<&Value> = spec
        .paths
        .iter()
        .flat_map(|path| values_at(doc, path))
        .collect();
    if values.is_empty() {
        return false;
    }

    match filter {
        ResolvedFilter::Exact(expected) => values.iter().any(|v| text_eq(spec, v, expected)),
        ResolvedFilter::Set(options) => values
            .iter()
            .any(|v| options.iter().any(|o| text_eq(spec, v, o))),
        ResolvedFilter::Contains(needle) => {
            let needle = needle.to_lowercase();
            values.iter().any(|v| {
                value_text(v).is_some_and(|text| text.to_lowercase().contains(&needle))
            })
        }
        ResolvedFilter::Bool(expected) => values.iter().any(|v| as_bool(v) == Some(*expected)),
        ResolvedFilter::Range { after, before } => values
            .iter()
            .filter_map(|v| timestamp_from_value(v))
            .any(|ts| after.is_none_or(|a| ts >= a) && before.is_none_or(|b| ts < b)),
    }
}

/// Whether `doc` satisfies every filter whose field is not in `skip`.
pub fn matches_all<'a, I>(doc: &Value, shelf: Shelf, filters: I, skip: &[String]) -> bool
where
    I: IntoIterator<Item = (&'a String, &'a ResolvedFilter)>,
{
    filters
        .into_iter()
        .filter(|(field, _)| !skip.contains(field))
        .all(|(field, filter)| match shelf.field(field) {
            Some(spec) => matches(doc, spec, filter),
            None => false,
        })
}

/// Render a scalar JSON value as text.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn text_eq(spec: &FieldSpec, value: &Value, expected: &str) -> bool {
    let Some(text) = value_text(value) else {
        return false;
    };
    if text.eq_ignore_ascii_case(expected) {
        return true;
    }
    // Native sources use their own spellings for enum values ("done")
    match spec.kind {
        FieldKind::Enum(vocabulary) => canonical_enum(vocabulary, &text)
            .is_some_and(|(canonical, _)| canonical.eq_ignore_ascii_case(expected)),
        _ => false,
    }
}
