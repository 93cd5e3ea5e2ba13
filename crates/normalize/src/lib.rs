//! # Shelfwise Normalize
//!
//! Maps connector-native records onto the canonical shelf schemas.
//!
//! Normalization is total over optional fields: anything missing degrades
//! to `None` / empty. Only a required field that cannot be inferred drops
//! the record, reported as [`NormalizationDropped`]. Every inference
//! lowers the record's confidence.

pub mod sensitivity;
mod shelves;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use shelfwise_core::shelf::canonical_enum;
use shelfwise_core::time::timestamp_from_value;
use shelfwise_core::{CanonicalRecord, NativeRecord, Shelf, SourceInfo, SourcePointer};
use tracing::debug;

pub use sensitivity::{Basis, classify};

/// Multiplier applied to confidence for each inferred field.
pub const INFERENCE_PENALTY: f32 = 0.9;

/// Multiplier applied when sensitivity was classified from content.
pub const CLASSIFICATION_PENALTY: f32 = 0.8;

/// A native record that could not be canonicalized.
#[derive(Debug, Clone, thiserror::Error)]
#[error("record {} from '{connector}' dropped from {shelf}: {reason}", .external_id.as_deref().unwrap_or("<no id>"))]
pub struct NormalizationDropped {
    pub connector: String,
    pub shelf: Shelf,
    pub external_id: Option<String>,
    pub reason: String,
}

/// Stateless native → canonical mapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize one native record for `shelf`.
    pub fn normalize(
        &self,
        shelf: Shelf,
        native: NativeRecord,
        source: &SourceInfo,
    ) -> Result<CanonicalRecord, NormalizationDropped> {
        let external_id = native
            .external_id
            .clone()
            .or_else(|| native.data.get("id").and_then(scalar_text));

        let dropped = |reason: &str| NormalizationDropped {
            connector: source.connector.clone(),
            shelf,
            external_id: external_id.clone(),
            reason: reason.to_string(),
        };

        let Some(external_id) = external_id.clone() else {
            return Err(dropped("missing id"));
        };

        let mut draft = Draft::new(&native.data);
        let (payload, free_text) = shelves::map(shelf, &mut draft).map_err(dropped)?;

        let free_text: Vec<&str> = free_text.iter().map(String::as_str).collect();
        let (sensitivity, basis) = classify(shelf, &native.data, &free_text);
        if basis == Basis::Classified {
            debug!(record = %external_id, shelf = shelf.as_str(), "Sensitivity classified from content");
            draft.confidence *= CLASSIFICATION_PENALTY;
        }

        let created_at = draft.time("created_at");
        let updated_at = match draft.time("updated_at") {
            Some(t) => Some(t),
            None => created_at.inspect(|_| draft.infer()),
        };

        let url = native
            .url
            .clone()
            .or_else(|| draft.text_any(&["url", "link", "html_link", "web_url"]));

        Ok(CanonicalRecord {
            id: external_id.clone(),
            created_at,
            updated_at,
            source: SourcePointer {
                system: source.system.clone(),
                external_id,
                url,
                hash: content_hash(&native.data),
            },
            confidence: draft.confidence.clamp(0.0, 1.0),
            sensitivity,
            payload,
        })
    }
}

/// SHA-256 (hex) of the record's JSON, keys sorted.
pub fn content_hash(data: &Value) -> String {
    // serde_json's default map is ordered, so serialization is canonical
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accessors over a native document that track confidence as fields are
/// inferred.
pub(crate) struct Draft<'a> {
    data: &'a Value,
    confidence: f32,
}

impl<'a> Draft<'a> {
    fn new(data: &'a Value) -> Self {
        let confidence = data
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| (c as f32).clamp(0.0, 1.0))
            .unwrap_or(1.0);
        Self { data, confidence }
    }

    /// Record one inference.
    pub(crate) fn infer(&mut self) {
        self.confidence *= INFERENCE_PENALTY;
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        let data: &'a Value = self.data;
        data.get(key).filter(|v| !v.is_null())
    }

    /// Non-empty text at `key`.
    pub(crate) fn text(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }

    /// First non-empty text among `keys`.
    pub(crate) fn text_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.text(k))
    }

    /// Strings at `key`: a list, a single string, or objects carrying an
    /// `email` field.
    pub(crate) fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(email_or_text).collect(),
            Some(other) => email_or_text(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key).and_then(timestamp_from_value)
    }

    pub(crate) fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Map an enum field onto `vocabulary`, inferring `default` when it is
    /// missing or unrecognized.
    pub(crate) fn enumerated(
        &mut self,
        key: &str,
        vocabulary: &[&'static str],
        default: &'static str,
    ) -> String {
        let raw = self.text(key);
        self.enumerated_value(raw.as_deref(), vocabulary, default)
    }

    pub(crate) fn enumerated_value(
        &mut self,
        raw: Option<&str>,
        vocabulary: &[&'static str],
        default: &'static str,
    ) -> String {
        match raw.and_then(|r| canonical_enum(vocabulary, r)) {
            Some((value, false)) => value.to_string(),
            Some((value, true)) => {
                self.infer();
                value.to_string()
            }
            None => {
                self.infer();
                default.to_string()
            }
        }
    }
}

fn email_or_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("email").and_then(scalar_text),
        other => scalar_text(other),
    }
}
