//! Structured queries: the validated form of an agent's shelf request.
//!
//! A [`StructuredQuery`] keeps date bounds symbolic ([`DateExpr`]) so that
//! relative expressions like `+7days` are evaluated against the wall clock
//! at *evaluation* time. [`StructuredQuery::resolve`] turns it into a
//! [`ResolvedQuery`] with absolute UTC bounds; that is what connectors see
//! and what the cache fingerprints.

use crate::shelf::Shelf;
use crate::time::{Granularity, start_of_day};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default page size when `limit` is omitted.
pub const DEFAULT_LIMIT: usize = 50;

/// Upper bound `limit` is clamped to.
pub const MAX_LIMIT: usize = 500;

/// Raw, unparsed query parameters as supplied by a client.
pub type RawParams = BTreeMap<String, String>;

/// Unit of a relative date offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

/// A date bound as written by the agent, resolved lazily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateExpr {
    Absolute {
        at: DateTime<Utc>,
        /// True when the source text was a bare date.
        day: bool,
    },
    Today,
    Tomorrow,
    Yesterday,
    Now,
    Offset {
        amount: i64,
        unit: DateUnit,
    },
}

impl DateExpr {
    /// Whether this expression denotes a whole day or an instant.
    pub fn granularity(&self) -> Granularity {
        match self {
            DateExpr::Absolute { day: true, .. } => Granularity::Day,
            DateExpr::Absolute { day: false, .. } | DateExpr::Now => Granularity::Instant,
            DateExpr::Offset {
                unit: DateUnit::Hours,
                ..
            } => Granularity::Instant,
            DateExpr::Today | DateExpr::Tomorrow | DateExpr::Yesterday | DateExpr::Offset { .. } => {
                Granularity::Day
            }
        }
    }

    /// The instant this expression points at, evaluated at `now`.
    ///
    /// Day-granular expressions anchor at UTC midnight of the target day.
    pub fn anchor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = start_of_day(now);
        match self {
            DateExpr::Absolute { at, .. } => *at,
            DateExpr::Now => now,
            DateExpr::Today => today,
            DateExpr::Tomorrow => shift(today, Duration::days(1)),
            DateExpr::Yesterday => shift(today, Duration::days(-1)),
            DateExpr::Offset { amount, unit } => match unit {
                DateUnit::Hours => offset(now, *amount, Duration::try_hours),
                DateUnit::Days => offset(today, *amount, Duration::try_days),
                DateUnit::Weeks => offset(today, *amount, Duration::try_weeks),
                DateUnit::Months => {
                    let months = Months::new(amount.unsigned_abs().min(u32::MAX as u64) as u32);
                    let shifted = if *amount >= 0 {
                        today.checked_add_months(months)
                    } else {
                        today.checked_sub_months(months)
                    };
                    shifted.unwrap_or_else(|| saturated(*amount < 0))
                }
            },
        }
    }

    /// Inclusive lower bound when used as `*_after`.
    pub fn lower_bound(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.anchor(now)
    }

    /// Exclusive upper bound when used as `*_before`: the end of the day for
    /// day-granular expressions, the instant itself otherwise.
    pub fn upper_bound(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let anchor = self.anchor(now);
        match self.granularity() {
            Granularity::Day => shift(anchor, Duration::days(1)),
            Granularity::Instant => anchor,
        }
    }

    /// The half-open span covered by an exact match on this expression.
    pub fn span(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let anchor = self.anchor(now);
        match self.granularity() {
            Granularity::Day => (anchor, shift(anchor, Duration::days(1))),
            Granularity::Instant => (anchor, shift(anchor, Duration::seconds(1))),
        }
    }
}

/// `at + delta`, pinned to the representable range instead of overflowing.
fn shift(at: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta)
        .unwrap_or_else(|| saturated(delta < Duration::zero()))
}

fn offset(at: DateTime<Utc>, amount: i64, unit: fn(i64) -> Option<Duration>) -> DateTime<Utc> {
    match unit(amount) {
        Some(delta) => shift(at, delta),
        None => saturated(amount < 0),
    }
}

fn saturated(backwards: bool) -> DateTime<Utc> {
    if backwards {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    }
}

/// A typed filter value as parsed from the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FilterValue {
    /// `field=v`
    Exact(String),
    /// `field=true|false` on boolean fields.
    Bool(bool),
    /// `field=v1,v2`
    Set(Vec<String>),
    /// `field_contains=s`
    Contains(String),
    /// `field_after=...` and/or `field_before=...`
    Range {
        after: Option<DateExpr>,
        before: Option<DateExpr>,
    },
    /// `field=<date>` on a date field.
    On(DateExpr),
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => f.write_str("asc"),
            SortOrder::Desc => f.write_str("desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{other}'; valid values: asc, desc")),
        }
    }
}

/// Sort key and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: "updated_at".into(),
            order: SortOrder::Desc,
        }
    }
}

/// A validated query against one shelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredQuery {
    pub shelf: Shelf,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,
    #[serde(default)]
    pub sort: SortSpec,
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl StructuredQuery {
    /// An unfiltered query with default sort and paging.
    pub fn new(shelf: Shelf) -> Self {
        Self {
            shelf,
            filters: BTreeMap::new(),
            sort: SortSpec::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Builder-style filter insertion.
    pub fn with_filter(mut self, field: impl Into<String>, value: FilterValue) -> Self {
        self.filters.insert(field.into(), value);
        self
    }

    /// Builder-style paging.
    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Builder-style sort.
    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = SortSpec {
            field: field.into(),
            order,
        };
        self
    }

    /// Evaluate every date expression against `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> ResolvedQuery {
        let filters = self
            .filters
            .iter()
            .map(|(name, value)| {
                let resolved = match value {
                    FilterValue::Exact(v) => ResolvedFilter::Exact(v.clone()),
                    FilterValue::Bool(b) => ResolvedFilter::Bool(*b),
                    FilterValue::Set(vs) => ResolvedFilter::Set(vs.clone()),
                    FilterValue::Contains(s) => ResolvedFilter::Contains(s.clone()),
                    FilterValue::Range { after, before } => ResolvedFilter::Range {
                        after: after.as_ref().map(|e| e.lower_bound(now)),
                        before: before.as_ref().map(|e| e.upper_bound(now)),
                    },
                    FilterValue::On(expr) => {
                        let (start, end) = expr.span(now);
                        ResolvedFilter::Range {
                            after: Some(start),
                            before: Some(end),
                        }
                    }
                };
                (name.clone(), resolved)
            })
            .collect();

        ResolvedQuery {
            shelf: self.shelf,
            filters,
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.offset,
            evaluated_at: now,
        }
    }
}

/// A filter with absolute date bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum ResolvedFilter {
    Exact(String),
    Bool(bool),
    Set(Vec<String>),
    Contains(String),
    /// `after` is inclusive, `before` exclusive.
    Range {
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
}

/// A query evaluated at a specific instant; what connectors receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedQuery {
    pub shelf: Shelf,
    pub filters: BTreeMap<String, ResolvedFilter>,
    pub sort: SortSpec,
    pub limit: usize,
    pub offset: usize,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::parse_timestamp;

    fn noon() -> DateTime<Utc> {
        parse_timestamp("2025-03-10T12:00:00Z").unwrap()
    }

    #[test]
    fn relative_days_anchor_at_midnight() {
        let expr = DateExpr::Offset {
            amount: 7,
            unit: DateUnit::Days,
        };
        assert_eq!(expr.anchor(noon()), parse_timestamp("2025-03-17").unwrap());
        assert_eq!(expr.upper_bound(noon()), parse_timestamp("2025-03-18").unwrap());
    }

    #[test]
    fn bounds_near_the_end_of_time_saturate() {
        let last_day = DateExpr::Absolute {
            at: start_of_day(DateTime::<Utc>::MAX_UTC),
            day: true,
        };
        assert_eq!(last_day.upper_bound(noon()), DateTime::<Utc>::MAX_UTC);
        assert_eq!(last_day.span(noon()).1, DateTime::<Utc>::MAX_UTC);

        let far_back = DateExpr::Offset {
            amount: i64::MIN,
            unit: DateUnit::Weeks,
        };
        assert_eq!(far_back.anchor(noon()), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn hours_are_instant_granular() {
        let expr = DateExpr::Offset {
            amount: -2,
            unit: DateUnit::Hours,
        };
        assert_eq!(expr.granularity(), Granularity::Instant);
        assert_eq!(
            expr.upper_bound(noon()),
            parse_timestamp("2025-03-10T10:00:00Z").unwrap()
        );
    }

    #[test]
    fn months_clamp_to_month_end() {
        let jan31 = parse_timestamp("2025-01-31T08:00:00Z").unwrap();
        let expr = DateExpr::Offset {
            amount: 1,
            unit: DateUnit::Months,
        };
        assert_eq!(expr.anchor(jan31), parse_timestamp("2025-02-28").unwrap());
    }

    #[test]
    fn resolving_at_different_times_moves_bounds() {
        let query = StructuredQuery::new(Shelf::Tasks).with_filter(
            "due_date",
            FilterValue::Range {
                after: None,
                before: Some(DateExpr::Today),
            },
        );
        let a = query.resolve(noon());
        let b = query.resolve(noon() + Duration::days(1));
        assert_ne!(a.filters, b.filters);
    }

    #[test]
    fn exact_day_becomes_full_day_range() {
        let query =
            StructuredQuery::new(Shelf::Tasks).with_filter("due_date", FilterValue::On(DateExpr::Today));
        let resolved = query.resolve(noon());
        assert_eq!(
            resolved.filters["due_date"],
            ResolvedFilter::Range {
                after: Some(parse_timestamp("2025-03-10").unwrap()),
                before: Some(parse_timestamp("2025-03-11").unwrap()),
            }
        );
    }

    #[test]
    fn defaults() {
        let query = StructuredQuery::new(Shelf::Comms);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.offset, 0);
        assert_eq!(query.sort.field, "updated_at");
        assert_eq!(query.sort.order, SortOrder::Desc);
    }
}
