//! Custom error types for the translation router

use thiserror::Error;

use crate::core::models::AttemptRecord;

/// Failure categories reported by backend adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BackendErrorKind {
    /// Provider asked us to slow down (HTTP 429)
    RateLimit,
    /// Credentials rejected; non-retryable for the session
    Auth,
    /// Request exceeded the per-attempt deadline
    Timeout,
    /// Response could not be parsed, or it violated a glossary constraint
    MalformedResponse,
    /// Anything else (network failure, 5xx, ...)
    Unknown,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendErrorKind::RateLimit => "rate_limit",
            BackendErrorKind::Auth => "auth",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::MalformedResponse => "malformed_response",
            BackendErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Error returned by a single backend adapter call
#[derive(Error, Debug, Clone)]
#[error("backend error ({kind}): {message}")]
pub struct BackendError {
    /// Failure category, drives retry/fallback decisions
    pub kind: BackendErrorKind,
    /// Provider-specific detail for diagnostics
    pub message: String,
}

impl BackendError {
    /// Build an error of the given kind
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Retryable on the same backend? AUTH failures are not.
    pub fn is_retryable(&self) -> bool {
        self.kind != BackendErrorKind::Auth
    }
}

/// Router-level errors
#[derive(Error, Debug)]
pub enum RouterError {
    /// Glossary file malformed; fatal at load, aborts the session
    #[error("glossary parse error: {message}")]
    GlossaryParse {
        message: String,
    },

    /// Pre-flight budget gate refused the job; no attempt was made
    #[error("budget exceeded: spent {spent:.4} of {limit:.4}")]
    BudgetExceeded {
        spent: f64,
        limit: f64,
    },

    /// Every enabled backend was exhausted for this job
    #[error("all backends failed after {} attempt(s)", attempts.len())]
    AllBackendsFailed {
        attempts: Vec<AttemptRecord>,
    },

    /// No enabled backends remain in the session (all auth-disabled)
    #[error("no enabled backends available")]
    NoBackendsAvailable,

    /// File operation error
    #[error("file error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
