//! Authenticated request pipeline: attach, detect, refresh, replay once.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde::de::DeserializeOwned;

use super::coordinator::RefreshCoordinator;
use super::events::{SessionEvent, SessionEventBus};
use super::store::{load_credential, load_session_meta, CredentialStore};
use crate::config::SessionConfig;
use crate::error::HearthError;
pub use crate::transport::{ApiRequest, ApiResponse};
use crate::transport::Transport;

const DEFAULT_SKIP_ENDPOINTS: &[&str] = &["/auth/login", "/auth/register", "/auth/refresh"];
const DEFAULT_SKIP_PATTERNS: &[&str] = &[r"^/invitations/[^/]+$"];

/// Endpoints that never carry a token and never trigger a refresh.
#[derive(Debug, Clone)]
pub struct SkipList {
    exact: BTreeSet<String>,
    patterns: Vec<Regex>,
}

impl Default for SkipList {
    fn default() -> Self {
        let mut list = Self::empty();
        for endpoint in DEFAULT_SKIP_ENDPOINTS {
            list.add_exact(*endpoint);
        }
        list.patterns = DEFAULT_SKIP_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        list
    }
}

impl SkipList {
    pub fn empty() -> Self {
        Self {
            exact: BTreeSet::new(),
            patterns: Vec::new(),
        }
    }

    pub fn add_exact(&mut self, endpoint: impl Into<String>) {
        self.exact.insert(normalize_endpoint(&endpoint.into()).to_string());
    }

    pub fn add_pattern(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn matches(&self, endpoint: &str) -> bool {
        let endpoint = normalize_endpoint(endpoint);
        self.exact.contains(endpoint) || self.patterns.iter().any(|re| re.is_match(endpoint))
    }
}

fn normalize_endpoint(endpoint: &str) -> &str {
    let path = endpoint.split('?').next().unwrap_or_default();
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// The sanctioned way to call the remote API once authenticated.
///
/// Every request carries the stored access token. A 401/403 triggers one
/// refresh through the [`RefreshCoordinator`] and a single replay; the
/// replay's outcome is final.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
    events: SessionEventBus,
    skip_list: SkipList,
    grace_window: chrono::Duration,
    access_denied_marker: String,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        coordinator: RefreshCoordinator,
        events: SessionEventBus,
        config: &SessionConfig,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            events,
            skip_list: config.skip_list.clone(),
            grace_window: config.grace_window(),
            access_denied_marker: config.access_denied_marker.to_lowercase(),
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn skip_list(&self) -> &SkipList {
        &self.skip_list
    }

    /// Send `request`, refreshing and replaying once on an authorization failure.
    ///
    /// Authorization failures that cannot be recovered are returned as the
    /// original response, not as an error.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, HearthError> {
        if self.skip_list.matches(request.endpoint()) {
            return self.transport.send(&request).await;
        }

        if let Some(credential) = load_credential(self.store.as_ref()).await {
            request.authorize(&credential);
        }
        let response = self.transport.send(&request).await?;
        if !response.is_auth_failure() {
            return Ok(response);
        }

        if self.is_family_denial(&response) {
            tracing::info!(path = %request.endpoint(), "Family access denied");
            self.events.emit(SessionEvent::AccessDenied {
                details: response.body.clone(),
            });
        }

        if request.retried {
            return Ok(response);
        }

        let meta = load_session_meta(self.store.as_ref()).await;
        if meta.in_grace_period(Utc::now(), self.grace_window) {
            tracing::debug!(
                path = %request.endpoint(),
                status = response.status,
                "Authorization failure inside registration grace period; not refreshing"
            );
            return Ok(response);
        }

        match self.coordinator.refresh().await {
            Ok(credential) => {
                request.retried = true;
                request.authorize(&credential);
                tracing::debug!(path = %request.endpoint(), "Replaying request after token refresh");
                self.transport.send(&request).await
            }
            Err(err) => {
                if err.counts_as_refresh_failure() {
                    tracing::warn!(
                        path = %request.endpoint(),
                        error = %err,
                        "Refresh failed; returning original response"
                    );
                } else {
                    tracing::debug!(error = %err, "Refresh unavailable; returning original response");
                }
                Ok(response)
            }
        }
    }

    /// Send and decode a JSON success body; failures become typed errors.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, HearthError> {
        self.send(request).await?.json()
    }

    fn is_family_denial(&self, response: &ApiResponse) -> bool {
        response.status == 403
            && !self.access_denied_marker.is_empty()
            && response.body.to_lowercase().contains(&self.access_denied_marker)
    }
}
