//! Sensitivity classification.
//!
//! Precedence: an explicit hint on the native record, then a keyword scan
//! of the record's free text, then the conservative default (S2). S1 is
//! only ever assigned from an explicit hint.

use serde_json::Value;
use shelfwise_core::{Sensitivity, Shelf};

/// Single-word markers; matched against whole words.
const CONFIDENTIAL_WORDS: &[&str] = &[
    "confidential",
    "password",
    "passwords",
    "ssn",
    "salary",
    "medical",
    "diagnosis",
    "nda",
    "passport",
    "privileged",
];

/// Multi-word markers; matched as substrings.
const CONFIDENTIAL_PHRASES: &[&str] = &["social security", "bank account", "do not share"];

/// How a tier was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// The source said so.
    Explicit,
    /// Inferred from content.
    Classified,
    /// Nothing to go on.
    Default,
}

/// Decide the tier for a native record.
pub fn classify(shelf: Shelf, data: &Value, free_text: &[&str]) -> (Sensitivity, Basis) {
    if let Some(tier) = explicit_hint(shelf, data) {
        return (tier, Basis::Explicit);
    }
    if free_text.iter().any(|text| mentions_confidential(text)) {
        return (Sensitivity::S3, Basis::Classified);
    }
    (Sensitivity::S2, Basis::Default)
}

fn explicit_hint(shelf: Shelf, data: &Value) -> Option<Sensitivity> {
    if let Some(tier) = data
        .get("sensitivity")
        .and_then(Value::as_str)
        .and_then(parse_tier)
    {
        return Some(tier);
    }

    match shelf {
        Shelf::Calendar => {
            if data.get("private").and_then(Value::as_bool) == Some(true) {
                return Some(Sensitivity::S3);
            }
            match data
                .get("visibility")
                .and_then(Value::as_str)
                .map(str::to_ascii_lowercase)
                .as_deref()
            {
                Some("private") | Some("confidential") => Some(Sensitivity::S3),
                Some("public") => Some(Sensitivity::S1),
                _ => None,
            }
        }
        Shelf::Docs => match data.get("public").and_then(Value::as_bool) {
            Some(true) => Some(Sensitivity::S1),
            _ => None,
        },
        _ => None,
    }
}

fn parse_tier(raw: &str) -> Option<Sensitivity> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "s1" | "public" => Some(Sensitivity::S1),
        "s2" | "internal" => Some(Sensitivity::S2),
        "s3" | "confidential" | "restricted" | "secret" => Some(Sensitivity::S3),
        _ => None,
    }
}

/// Whether `text` contains a confidentiality marker.
pub fn mentions_confidential(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if CONFIDENTIAL_PHRASES.iter().any(|p| lowered.contains(p)) {
        return true;
    }
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| CONFIDENTIAL_WORDS.contains(&word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_field_wins_over_content() {
        let data = json!({ "sensitivity": "S1" });
        assert_eq!(
            classify(Shelf::Docs, &data, &["salary review"]),
            (Sensitivity::S1, Basis::Explicit)
        );
    }

    #[test]
    fn calendar_visibility() {
        let private = json!({ "visibility": "private" });
        assert_eq!(classify(Shelf::Calendar, &private, &[]).0, Sensitivity::S3);
        let public = json!({ "visibility": "public" });
        assert_eq!(classify(Shelf::Calendar, &public, &[]).0, Sensitivity::S1);
    }

    #[test]
    fn keyword_classification() {
        let data = json!({});
        assert_eq!(
            classify(Shelf::Comms, &data, &["Re: NDA draft"]),
            (Sensitivity::S3, Basis::Classified)
        );
        assert_eq!(
            classify(Shelf::Comms, &data, &["Your bank account details"]).0,
            Sensitivity::S3
        );
    }

    #[test]
    fn markers_are_whole_words() {
        // "agenda" and "calendar" contain "nda"
        assert!(!mentions_confidential("Monday agenda for the calendar sync"));
        assert!(mentions_confidential("nda: sign by friday"));
    }

    #[test]
    fn default_is_s2() {
        assert_eq!(
            classify(Shelf::Tasks, &json!({}), &["Buy milk"]),
            (Sensitivity::S2, Basis::Default)
        );
    }
}
