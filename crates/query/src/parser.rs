//! Raw parameter maps → [`StructuredQuery`].
//!
//! Operators are shelf-agnostic:
//!
//! ```text
//! field=v              exact
//! field=v1,v2          set membership
//! field_contains=s     substring (text and list fields)
//! field_after=d        range, inclusive lower bound   (alias: field_start)
//! field_before=d       range, exclusive upper bound   (alias: field_end)
//! ```
//!
//! Dates are ISO8601 or `today|tomorrow|yesterday|now|[+-]N(hours|days|weeks|months)`.
//! Relative expressions stay symbolic until the query is resolved.

use regex_lite::Regex;
use shelfwise_core::query::{
    DEFAULT_LIMIT, DateExpr, DateUnit, FilterValue, MAX_LIMIT, SortOrder, StructuredQuery,
};
use shelfwise_core::shelf::canonical_enum;
use shelfwise_core::time::{Granularity, parse_iso};
use shelfwise_core::{Error, FieldKind, FieldSpec, RawParams, Result, Shelf};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Keys that control paging and ordering rather than filtering.
pub const RESERVED_KEYS: &[&str] = &["limit", "offset", "sort_by", "sort_order"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Exact,
    Contains,
    After,
    Before,
}

const SUFFIXES: &[(&str, Operator)] = &[
    ("_contains", Operator::Contains),
    ("_after", Operator::After),
    ("_start", Operator::After),
    ("_before", Operator::Before),
    ("_end", Operator::Before),
];

static RELATIVE_DATE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([+-]?)(\d{1,6})\s*(hours?|days?|weeks?|months?)$").ok()
});

/// Parses raw parameter maps against a shelf's field catalog.
#[derive(Debug, Clone)]
pub struct QueryParser {
    default_limit: usize,
    max_limit: usize,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, MAX_LIMIT)
    }
}

impl QueryParser {
    pub fn new(default_limit: usize, max_limit: usize) -> Self {
        Self {
            default_limit,
            max_limit,
        }
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Parse `params` into a structured query for `shelf`.
    ///
    /// Every failure is an [`Error::InvalidParameter`] naming the offending
    /// key as the caller wrote it.
    pub fn parse(&self, shelf: Shelf, params: &RawParams) -> Result<StructuredQuery> {
        let mut query = StructuredQuery::new(shelf);
        query.limit = self.default_limit;

        for (raw_key, raw_value) in params {
            let key = resolve_alias(shelf, raw_key);
            let value = raw_value.trim();

            match key {
                "limit" => query.limit = self.parse_limit(value)?,
                "offset" => {
                    query.offset = value.parse().map_err(|_| {
                        Error::invalid(
                            "offset",
                            format!("expected a non-negative integer, got '{value}'"),
                        )
                    })?;
                }
                "sort_by" => query.sort.field = parse_sort_field(shelf, value)?.to_string(),
                "sort_order" => {
                    query.sort.order = value
                        .parse::<SortOrder>()
                        .map_err(|msg| Error::invalid("sort_order", msg))?;
                }
                _ => {
                    let (spec, op) = lookup(shelf, key).ok_or_else(|| unknown_key(shelf, raw_key))?;
                    if value.is_empty() {
                        return Err(Error::invalid(raw_key.as_str(), "value must not be empty"));
                    }
                    let filter = build_filter(spec, op, raw_key, value)?;
                    merge_filter(&mut query.filters, spec.name, filter, raw_key)?;
                }
            }
        }

        tracing::debug!(
            shelf = %shelf,
            filters = query.filters.len(),
            limit = query.limit,
            offset = query.offset,
            "Parsed query"
        );
        Ok(query)
    }

    fn parse_limit(&self, value: &str) -> Result<usize> {
        let limit: usize = value.parse().map_err(|_| {
            Error::invalid(
                "limit",
                format!("expected a positive integer, got '{value}'"),
            )
        })?;
        if limit == 0 {
            return Err(Error::invalid("limit", "must be greater than 0"));
        }
        if limit > self.max_limit {
            tracing::debug!(requested = limit, max = self.max_limit, "Clamping limit");
            return Ok(self.max_limit);
        }
        Ok(limit)
    }
}

/// Parse a date value: ISO8601 or the relative grammar.
pub fn parse_date_expr(raw: &str) -> Option<DateExpr> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();

    match lowered.as_str() {
        "today" => return Some(DateExpr::Today),
        "tomorrow" => return Some(DateExpr::Tomorrow),
        "yesterday" => return Some(DateExpr::Yesterday),
        "now" => return Some(DateExpr::Now),
        _ => {}
    }

    if let Some(re) = RELATIVE_DATE.as_ref()
        && let Some(caps) = re.captures(&lowered)
    {
        let magnitude: i64 = caps[2].parse().ok()?;
        let amount = if &caps[1] == "-" { -magnitude } else { magnitude };
        let unit = match caps[3].trim_end_matches('s') {
            "hour" => DateUnit::Hours,
            "day" => DateUnit::Days,
            "week" => DateUnit::Weeks,
            _ => DateUnit::Months,
        };
        return Some(DateExpr::Offset { amount, unit });
    }

    parse_iso(trimmed).map(|(at, granularity)| DateExpr::Absolute {
        at,
        day: granularity == Granularity::Day,
    })
}

/// Every parameter key accepted for `shelf`.
pub fn valid_keys(shelf: Shelf) -> Vec<String> {
    let mut keys: Vec<String> = RESERVED_KEYS.iter().map(|k| k.to_string()).collect();
    for spec in shelf.fields() {
        keys.push(spec.name.to_string());
        match spec.kind {
            FieldKind::Text | FieldKind::List => keys.push(format!("{}_contains", spec.name)),
            FieldKind::Date => {
                keys.push(format!("{}_after", spec.name));
                keys.push(format!("{}_before", spec.name));
            }
            FieldKind::Enum(_) | FieldKind::Bool => {}
        }
    }
    keys.extend(shelf.aliases().iter().map(|(alias, _)| alias.to_string()));
    keys
}

fn resolve_alias<'a>(shelf: Shelf, key: &'a str) -> &'a str {
    shelf
        .aliases()
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, target)| *target)
        .unwrap_or(key)
}

fn lookup(shelf: Shelf, key: &str) -> Option<(&'static FieldSpec, Operator)> {
    if let Some(spec) = shelf.field(key) {
        return Some((spec, Operator::Exact));
    }
    SUFFIXES.iter().find_map(|(suffix, op)| {
        key.strip_suffix(suffix)
            .and_then(|name| shelf.field(name))
            .map(|spec| (spec, *op))
    })
}

fn unknown_key(shelf: Shelf, key: &str) -> Error {
    Error::invalid(
        key,
        format!(
            "unknown parameter for shelf '{shelf}'; valid parameters: {}",
            valid_keys(shelf).join(", ")
        ),
    )
}

fn parse_sort_field(shelf: Shelf, value: &str) -> Result<&'static str> {
    match shelf.field(value) {
        Some(spec) if spec.sortable => Ok(spec.name),
        _ => {
            let sortable: Vec<&str> = shelf
                .fields()
                .iter()
                .filter(|f| f.sortable)
                .map(|f| f.name)
                .collect();
            Err(Error::invalid(
                "sort_by",
                format!(
                    "cannot sort {shelf} by '{value}'; sortable fields: {}",
                    sortable.join(", ")
                ),
            ))
        }
    }
}

fn build_filter(spec: &FieldSpec, op: Operator, param: &str, value: &str) -> Result<FilterValue> {
    match (op, spec.kind) {
        (Operator::Contains, FieldKind::Text | FieldKind::List) => {
            Ok(FilterValue::Contains(value.to_string()))
        }
        (Operator::Contains, _) => Err(Error::invalid(
            param,
            format!("'{}' does not support substring matching", spec.name),
        )),
        (Operator::After | Operator::Before, FieldKind::Date) => {
            let expr = parse_date(param, value)?;
            Ok(if op == Operator::After {
                FilterValue::Range {
                    after: Some(expr),
                    before: None,
                }
            } else {
                FilterValue::Range {
                    after: None,
                    before: Some(expr),
                }
            })
        }
        (Operator::After | Operator::Before, _) => Err(Error::invalid(
            param,
            format!("'{}' is not a date field and has no range operators", spec.name),
        )),
        (Operator::Exact, FieldKind::Date) => Ok(FilterValue::On(parse_date(param, value)?)),
        (Operator::Exact, FieldKind::Bool) => match value {
            "true" => Ok(FilterValue::Bool(true)),
            "false" => Ok(FilterValue::Bool(false)),
            other => Err(Error::invalid(
                param,
                format!("expected 'true' or 'false', got '{other}'"),
            )),
        },
        (Operator::Exact, FieldKind::Enum(vocabulary)) => {
            let values = split_values(param, value)?
                .into_iter()
                .map(|v| {
                    canonical_enum(vocabulary, &v)
                        .map(|(canonical, _)| canonical.to_string())
                        .ok_or_else(|| {
                            Error::invalid(
                                param,
                                format!(
                                    "invalid value '{v}'; valid values: {}",
                                    vocabulary.join(", ")
                                ),
                            )
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(one_or_set(dedup(values)))
        }
        (Operator::Exact, FieldKind::Text | FieldKind::List) => {
            Ok(one_or_set(dedup(split_values(param, value)?)))
        }
    }
}

fn parse_date(param: &str, value: &str) -> Result<DateExpr> {
    parse_date_expr(value).ok_or_else(|| {
        Error::invalid(
            param,
            format!(
                "invalid date '{value}'; expected ISO8601 or \
                 today|tomorrow|yesterday|now|[+-]N(hours|days|weeks|months)"
            ),
        )
    })
}

fn split_values(param: &str, value: &str) -> Result<Vec<String>> {
    let values: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() {
        return Err(Error::invalid(param, "value must not be empty"));
    }
    Ok(values)
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

fn one_or_set(mut values: Vec<String>) -> FilterValue {
    if values.len() == 1 {
        FilterValue::Exact(values.remove(0))
    } else {
        FilterValue::Set(values)
    }
}

/// Insert `filter`, combining `_after` and `_before` on the same field.
fn merge_filter(
    filters: &mut BTreeMap<String, FilterValue>,
    field: &str,
    filter: FilterValue,
    param: &str,
) -> Result<()> {
    let Some(existing) = filters.get_mut(field) else {
        filters.insert(field.to_string(), filter);
        return Ok(());
    };

    let conflict = || {
        Error::invalid(
            param,
            format!("conflicts with another filter on '{field}'"),
        )
    };

    match (existing, filter) {
        (
            FilterValue::Range { after, before },
            FilterValue::Range {
                after: new_after,
                before: new_before,
            },
        ) => {
            if (after.is_some() && new_after.is_some()) || (before.is_some() && new_before.is_some())
            {
                return Err(conflict());
            }
            if new_after.is_some() {
                *after = new_after;
            }
            if new_before.is_some() {
                *before = new_before;
            }
            Ok(())
        }
        _ => Err(conflict()),
    }
}
