//! Timestamp parsing shared by the parser, matcher, and normalizer.
//!
//! All instants are UTC. Date-only values are anchored at UTC midnight and
//! remember that they were day-granular.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// How precise a parsed date expression is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// A calendar day (`2025-03-01`, `today`, `+7days`).
    Day,
    /// A specific instant (`2025-03-01T09:00:00Z`, `now`, `-2hours`).
    Instant,
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Calendar years accepted from text. Extended ISO years (`+262142-12-31`)
/// parse but leave no room for day arithmetic.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1..=9999;

/// Parse an ISO8601 timestamp or date, reporting its granularity.
///
/// Years outside [`YEAR_RANGE`] are rejected.
pub fn parse_iso(s: &str) -> Option<(DateTime<Utc>, Granularity)> {
    parse_iso_any_year(s).filter(|(dt, _)| YEAR_RANGE.contains(&dt.year()))
}

fn parse_iso_any_year(s: &str) -> Option<(DateTime<Utc>, Granularity)> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some((dt.with_timezone(&Utc), Granularity::Instant));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some((naive.and_utc(), Granularity::Instant));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|date| (date.and_time(NaiveTime::MIN).and_utc(), Granularity::Day))
}

/// Parse an ISO8601 timestamp or date into a UTC instant.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    parse_iso(s).map(|(dt, _)| dt)
}

/// Interpret a JSON value as a timestamp: ISO strings, or integer epoch
/// seconds (values above 10^12 are taken as milliseconds).
pub fn timestamp_from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp(s),
        serde_json::Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.abs() > 1_000_000_000_000 {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

/// Midnight (UTC) of the day containing `dt`.
pub fn start_of_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_rfc3339_as_instant() {
        let (dt, g) = parse_iso("2025-03-01T09:30:00+02:00").unwrap();
        assert_eq!(g, Granularity::Instant);
        assert_eq!(dt.hour(), 7);
    }

    #[test]
    fn extended_years_rejected() {
        assert!(parse_iso("+262142-12-31").is_none());
        assert!(parse_iso("+262142-12-31T00:00:00Z").is_none());
        assert!(parse_iso("9999-12-31").is_some());
    }

    #[test]
    fn parses_date_as_day() {
        let (dt, g) = parse_iso("2025-03-01").unwrap();
        assert_eq!(g, Granularity::Day);
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn parses_naive_datetime() {
        let dt = parse_timestamp("2025-03-01T10:15:00").unwrap();
        assert_eq!(dt.minute(), 15);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_iso("next tuesday").is_none());
        assert!(parse_iso("2025-13-01").is_none());
    }

    #[test]
    fn epoch_values() {
        let secs = timestamp_from_value(&serde_json::json!(1_700_000_000)).unwrap();
        let millis = timestamp_from_value(&serde_json::json!(1_700_000_000_000i64)).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn start_of_day_truncates() {
        let dt = parse_timestamp("2025-03-01T23:59:59Z").unwrap();
        assert_eq!(start_of_day(dt), parse_timestamp("2025-03-01").unwrap());
    }
}
