//! Error types for Hearth.

use thiserror::Error;

use crate::auth::error::SessionError;

/// Primary error type for all Hearth operations.
#[derive(Error, Debug)]
pub enum HearthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl HearthError {
    /// Create an API error from a status and response body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether the error is an authorization failure (401/403 or a
    /// session-level denial).
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Api { status, .. } => matches!(status, 401 | 403),
            Self::Session(err) => err.is_terminal() || matches!(err, SessionError::AccessDenied(_)),
            _ => false,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => matches!(status, 429 | 500..=599),
            _ => false,
        }
    }
}

/// Map a non-success HTTP status and body to an error.
pub fn status_to_error(status: u16, body: &str) -> HearthError {
    let message = extract_message(body).unwrap_or_else(|| body.to_string());
    HearthError::api(status, message)
}

fn extract_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .or_else(|| value.get("error"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, HearthError>;
