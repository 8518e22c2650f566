//! Transport seam: the session core only needs "send request, get response".

pub mod http;

pub use http::{HttpAuthApi, HttpTransport};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::auth::error::SessionError;
use crate::auth::token::{Credential, LoginRequest, LoginResponse, RefreshResponse};
use crate::error::{status_to_error, HearthError};

/// Outgoing API call descriptor.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Endpoint path relative to the API root, optionally with a query string.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Set once the pipeline has replayed this request after a refresh.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Path without the query string, used for skip-list matching.
    pub fn endpoint(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }

    /// Replace the authorization header with `credential`'s bearer token.
    pub fn authorize(&mut self, credential: &Credential) {
        match HeaderValue::from_str(&credential.bearer()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                tracing::warn!("Access token is not a valid header value; sending unauthenticated");
                self.headers.remove(AUTHORIZATION);
            }
        }
    }
}

/// Response descriptor returned by a [`Transport`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401 or 403.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, 401 | 403)
    }

    /// Decode a success body, or map the failure to a typed error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HearthError> {
        if !self.is_success() {
            return Err(status_to_error(self.status, &self.body));
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Raw request execution against the remote API.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, HearthError>;
}

/// Authentication endpoints consumed by the session core.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, SessionError>;

    async fn register(&self, request: &LoginRequest) -> Result<LoginResponse, SessionError>;

    /// Exchange a refresh token. The response may lack an access token; the
    /// caller decides whether that is usable.
    async fn refresh_exchange(&self, refresh_token: &str) -> Result<RefreshResponse, SessionError>;
}
