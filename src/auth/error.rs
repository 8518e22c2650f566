use thiserror::Error;

/// Failures produced by the session core.
///
/// Cloneable so one refresh outcome can be handed to every caller waiting on
/// the same in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No refresh token available")]
    NoRefreshToken,
    #[error("Refresh request failed: {0}")]
    RefreshNetworkError(String),
    #[error("Refresh response was unusable: {0}")]
    RefreshInvalidResponse(String),
    #[error("Registration grace period active")]
    GracePeriodActive,
    #[error("Refresh retry budget exhausted after {retry_count} failures")]
    RetryBudgetExhausted { retry_count: u32 },
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Credential storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Session ended while refresh was in flight")]
    SessionEnded,
    #[error("Login failed: {0}")]
    LoginFailed(String),
}

impl SessionError {
    /// Whether the session cannot recover without a fresh login.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RetryBudgetExhausted { .. } | Self::SessionEnded)
    }

    /// Whether this failure counts against the retry budget.
    pub fn counts_as_refresh_failure(&self) -> bool {
        matches!(
            self,
            Self::NoRefreshToken | Self::RefreshNetworkError(_) | Self::RefreshInvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(error: reqwest::Error) -> Self {
        Self::RefreshNetworkError(error.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(error: toml::de::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

impl From<toml::ser::Error> for SessionError {
    fn from(error: toml::ser::Error) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}
