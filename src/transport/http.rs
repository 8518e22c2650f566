//! reqwest-backed transport and authentication client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;

use super::{ApiRequest, ApiResponse, AuthApi, Transport};
use crate::auth::error::SessionError;
use crate::auth::token::{LoginRequest, LoginResponse, RefreshResponse};
use crate::error::{status_to_error, HearthError};

const DEFAULT_LOGIN_PATH: &str = "/auth/login";
const DEFAULT_REGISTER_PATH: &str = "/auth/register";
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Build the HTTP client used by both adapters.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, HearthError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()?)
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Sends [`ApiRequest`]s over HTTP against a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, HearthError> {
        let url = join_url(&self.base_url, &request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.text().await?;
        tracing::debug!(method = %request.method, path = %request.endpoint(), status, "API response");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Login, registration and refresh-token exchange over HTTP.
///
/// # Example
/// ```no_run
/// use hearth::transport::HttpAuthApi;
///
/// let api = HttpAuthApi::new(reqwest::Client::new(), "https://api.example.com")
///     .with_refresh_path("/v2/auth/refresh");
/// ```
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: String,
    login_path: String,
    register_path: String,
    refresh_path: String,
}

impl HttpAuthApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            register_path: DEFAULT_REGISTER_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
        }
    }

    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn with_register_path(mut self, path: impl Into<String>) -> Self {
        self.register_path = path.into();
        self
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    async fn authenticate(
        &self,
        path: &str,
        request: &LoginRequest,
    ) -> Result<LoginResponse, SessionError> {
        let resp = self
            .client
            .post(join_url(&self.base_url, path))
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::LoginFailed(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::LoginFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(SessionError::LoginFailed(
                status_to_error(status.as_u16(), &body).to_string(),
            ));
        }
        let payload: LoginResponse = serde_json::from_str(&body)
            .map_err(|e| SessionError::LoginFailed(format!("Malformed login response: {e}")))?;
        if payload.access_token.is_empty() {
            return Err(SessionError::LoginFailed(
                "Login response missing access token".to_string(),
            ));
        }
        Ok(payload)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, SessionError> {
        self.authenticate(&self.login_path, request).await
    }

    async fn register(&self, request: &LoginRequest) -> Result<LoginResponse, SessionError> {
        self.authenticate(&self.register_path, request).await
    }

    async fn refresh_exchange(&self, refresh_token: &str) -> Result<RefreshResponse, SessionError> {
        let resp = self
            .client
            .post(join_url(&self.base_url, &self.refresh_path))
            .header(CONTENT_TYPE, "application/json")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::RefreshNetworkError(format!(
                "Refresh failed with status {status}"
            )));
        }
        let body = resp.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SessionError::RefreshInvalidResponse(format!("Malformed refresh response: {e}")))
    }
}
