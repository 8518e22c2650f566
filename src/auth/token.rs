use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access and refresh credentials for the signed-in user.
///
/// # Example
/// ```
/// use hearth::auth::Credential;
///
/// let credential = Credential::new("access", Some("refresh".to_string()));
/// assert_eq!(credential.bearer(), "Bearer access");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// Authorization header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Registration metadata used to compute the post-signup grace period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub registered_at: Option<DateTime<Utc>>,
    pub is_new_account: bool,
}

impl SessionMeta {
    /// Metadata for an account registered at `now`.
    pub fn registered(now: DateTime<Utc>) -> Self {
        Self {
            registered_at: Some(now),
            is_new_account: true,
        }
    }

    /// Whether `now` falls within `window` of the registration timestamp.
    ///
    /// A timestamp in the future (clock skew) counts as inside the window.
    pub fn in_grace_period(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.registered_at {
            Some(registered_at) => now - registered_at < window,
            None => false,
        }
    }
}

/// Credentials submitted to the login endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Successful login or registration payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default, alias = "userRecord")]
    pub user: Option<serde_json::Value>,
}

impl LoginResponse {
    pub fn credential(&self) -> Credential {
        Credential::new(self.access_token.clone(), self.refresh_token.clone())
    }
}

/// Refresh exchange payload; the server may omit a rotated refresh token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}
