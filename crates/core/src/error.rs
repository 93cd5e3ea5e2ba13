//! Error types for the Shelfwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Only contract
//! violations (bad parameters, missing scopes, exhausted rate limits) are
//! top-level errors; connector-scoped failures are recovered into
//! [`PartialFailure`](crate::result::PartialFailure) values instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Shelfwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Contract violations (fail fast, never partial data) ---
    #[error("Invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Permission denied: missing scope '{scope}'")]
    PermissionDenied { scope: String },

    // --- Admission control ---
    #[error("Rate limit exceeded for agent '{agent}' on {shelf}, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        agent: String,
        shelf: String,
        retry_after_ms: u64,
    },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::InvalidParameter`].
    pub fn invalid(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// The taxonomy kind reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Error::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Error::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Error::Config { .. } | Error::Serialization(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Error taxonomy as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidParameter,
    PermissionDenied,
    ConnectorError,
    RateLimitExceeded,
    NormalizationDropped,
    CacheBypass,
    Internal,
}

/// The `{error, message, details}` envelope returned to callers on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl From<&Error> for ErrorEnvelope {
    fn from(err: &Error) -> Self {
        let details = match err {
            Error::InvalidParameter { parameter, .. } => {
                serde_json::json!({ "parameter": parameter })
            }
            Error::PermissionDenied { scope } => serde_json::json!({ "scope": scope }),
            Error::RateLimitExceeded {
                agent,
                shelf,
                retry_after_ms,
            } => serde_json::json!({
                "agent": agent,
                "shelf": shelf,
                "retry_after_ms": retry_after_ms,
            }),
            _ => serde_json::Value::Null,
        };

        Self {
            error: err.kind(),
            message: err.to_string(),
            details,
        }
    }
}
