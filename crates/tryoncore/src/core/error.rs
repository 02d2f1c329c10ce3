
use serde_json::Value;
use thiserror::Error;

use crate::core::retry::{FailureClass, Retryable};

/// Centralized error types for the application
///
/// All errors in the core are converted to this enum for consistent error handling.
/// Uses `thiserror` for automatic error conversion and display formatting.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    /// HTTP/Fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A failed call to an external AI vendor, already classified
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Object storage upload/download failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Outbound messaging failures
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session not found for chat {0}")]
    SessionNotFound(i64),

    /// Stored credit balance is not a non-negative integer
    #[error("Corrupt credit balance for chat {chat_id}: {raw}")]
    CorruptBalance { chat_id: i64, raw: String },

    #[error("Invalid transition '{action}' from phase {phase}")]
    InvalidTransition { phase: String, action: &'static str },

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Short label used for metrics and analytics error counters
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::DatabasePool(_) | AppError::Migration(_) => "database",
            AppError::Http(_) => "http",
            AppError::Io(_) => "io",
            AppError::Json(_) => "json",
            AppError::Upstream(e) => e.kind(),
            AppError::Storage(_) => "storage",
            AppError::Transport(_) => "transport",
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::CorruptBalance { .. } => "corrupt_balance",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Validation(_) => "validation",
            AppError::Config(_) => "config",
            AppError::Anyhow(_) => "internal",
        }
    }
}

/// Closed set of failure kinds for calls to external AI vendors.
///
/// Every vendor-specific error shape is mapped into this enum at the HTTP boundary
/// by [`UpstreamError::from_vendor`]; downstream code only ever matches on variants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    /// Rate limit or quota exhaustion (HTTP 429, RESOURCE_EXHAUSTED)
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The vendor refused to produce output for policy reasons
    #[error("rejected by safety policy: {0}")]
    SafetyRejected(String),

    /// A required API key is not configured
    #[error("missing credential {0}")]
    MissingCredential(&'static str),

    /// Client-side rejection (4xx other than 429)
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Network failure, timeout or 5xx
    #[error("transport failure: {0}")]
    Transport(String),

    /// The vendor answered but the payload could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The rate-limited dispatcher could not run the call
    #[error("dispatch failure: {0}")]
    Dispatch(String),
}

const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

impl UpstreamError {
    /// Translates a vendor failure into an [`UpstreamError`].
    ///
    /// Quota exhaustion is detected in order of preference:
    /// 1. an explicit HTTP status of 429
    /// 2. a nested error object whose `status` is `RESOURCE_EXHAUSTED` or whose `code` is 429
    /// 3. a case-insensitive "quota" or "429" anywhere in the message or the serialized body
    ///
    /// Anything else is classified by status class.
    pub fn from_vendor(status: Option<u16>, body: Option<&Value>, message: &str) -> Self {
        if status == Some(429) {
            return UpstreamError::QuotaExceeded(message.to_string());
        }

        if let Some(body) = body {
            let nested = body.get("error").unwrap_or(body);
            let status_marker = nested.get("status").and_then(Value::as_str) == Some(RESOURCE_EXHAUSTED);
            let code_marker = nested.get("code").and_then(Value::as_u64) == Some(429);
            if status_marker || code_marker {
                return UpstreamError::QuotaExceeded(message.to_string());
            }
        }

        let haystack = match body {
            Some(body) => format!("{} {}", message, body).to_lowercase(),
            None => message.to_lowercase(),
        };
        if haystack.contains("quota") || haystack.contains("429") || haystack.contains("resource_exhausted") {
            return UpstreamError::QuotaExceeded(message.to_string());
        }

        match status {
            Some(s) if (400..500).contains(&s) => UpstreamError::Rejected {
                status: s,
                message: message.to_string(),
            },
            _ => UpstreamError::Transport(message.to_string()),
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, UpstreamError::QuotaExceeded(_))
    }

    /// Short label used for metrics and analytics error counters
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::QuotaExceeded(_) => "quota",
            UpstreamError::SafetyRejected(_) => "safety",
            UpstreamError::MissingCredential(_) => "missing_credential",
            UpstreamError::Rejected { .. } => "rejected",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::InvalidResponse(_) => "invalid_response",
            UpstreamError::Dispatch(_) => "dispatch",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::from_vendor(err.status().map(|s| s.as_u16()), None, &err.to_string())
    }
}

impl Retryable for UpstreamError {
    fn failure_class(&self) -> FailureClass {
        match self {
            UpstreamError::QuotaExceeded(_) => FailureClass::Quota,
            UpstreamError::Transport(_) | UpstreamError::InvalidResponse(_) => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_429_is_quota() {
        let err = UpstreamError::from_vendor(Some(429), None, "Too Many Requests");
        assert!(err.is_quota());
    }

    #[test]
    fn test_nested_resource_exhausted_is_quota() {
        let body = json!({"error": {"code": 400, "status": "RESOURCE_EXHAUSTED", "message": "slow down"}});
        let err = UpstreamError::from_vendor(Some(400), Some(&body), "slow down");
        assert!(err.is_quota());
    }

    #[test]
    fn test_nested_code_429_is_quota() {
        let body = json!({"error": {"code": 429}});
        assert!(UpstreamError::from_vendor(None, Some(&body), "failed").is_quota());
    }

    #[test]
    fn test_message_substring_is_quota() {
        assert!(UpstreamError::from_vendor(None, None, "You exceeded your current QUOTA").is_quota());
        assert!(UpstreamError::from_vendor(Some(500), None, "upstream said 429").is_quota());
    }

    #[test]
    fn test_other_statuses_are_classified_by_class() {
        assert_eq!(
            UpstreamError::from_vendor(Some(400), None, "bad image"),
            UpstreamError::Rejected {
                status: 400,
                message: "bad image".to_string()
            }
        );
        assert_eq!(
            UpstreamError::from_vendor(Some(503), None, "unavailable"),
            UpstreamError::Transport("unavailable".to_string())
        );
    }

    #[test]
    fn test_failure_classes() {
        assert_eq!(UpstreamError::Transport("x".into()).failure_class(), FailureClass::Transient);
        assert_eq!(UpstreamError::InvalidResponse("x".into()).failure_class(), FailureClass::Transient);
        assert_eq!(UpstreamError::QuotaExceeded("x".into()).failure_class(), FailureClass::Quota);
        assert_eq!(UpstreamError::SafetyRejected("x".into()).failure_class(), FailureClass::Permanent);
        assert_eq!(
            UpstreamError::MissingCredential("GEMINI_API_KEY").failure_class(),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_app_error_kind_delegates_to_upstream() {
        let err: AppError = UpstreamError::SafetyRejected("nope".into()).into();
        assert_eq!(err.kind(), "safety");
    }
}
