use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::coordinator::RefreshCoordinator;
use super::error::SessionError;
use super::events::{SessionEvent, SessionEventBus, Subscription};
use super::pipeline::{ApiRequest, ApiResponse, RequestPipeline};
use super::scheduler::ProactiveRefreshScheduler;
use super::store::{
    load_credential, read_or_absent, save_session_meta, CredentialStore, FileCredentialStore,
    SecretKey,
};
use super::token::{LoginRequest, LoginResponse, SessionMeta};
use crate::config::SessionConfig;
use crate::error::HearthError;
use crate::transport::http::build_client;
use crate::transport::{AuthApi, HttpAuthApi, HttpTransport, Transport};

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Owns the session lifecycle: login, restore, logout and the wiring between
/// store, event bus, coordinator, pipeline and scheduler.
///
/// # Example
/// ```no_run
/// use hearth::auth::{LoginRequest, SessionEvent, SessionManager};
/// use hearth::config::SessionConfig;
///
/// # async fn example() -> hearth::error::Result<()> {
/// let session = SessionManager::from_config(SessionConfig::from_env()?)?;
/// session.events().subscribe(|event| {
///     if let SessionEvent::AuthenticationRequired { .. } = event {
///         eprintln!("Session expired, please log in again");
///     }
/// });
/// session.login(&LoginRequest::new("ada@example.com", "hunter2")).await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    events: SessionEventBus,
    coordinator: RefreshCoordinator,
    pipeline: RequestPipeline,
    scheduler: ProactiveRefreshScheduler,
    exhaustion_watch: Subscription,
}

impl SessionManager {
    pub fn new(
        config: &SessionConfig,
        api: Arc<dyn AuthApi>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        events: SessionEventBus,
    ) -> Self {
        let coordinator =
            RefreshCoordinator::new(api.clone(), store.clone(), events.clone(), config);
        let pipeline = RequestPipeline::new(
            transport,
            store.clone(),
            coordinator.clone(),
            events.clone(),
            config,
        );
        let scheduler = ProactiveRefreshScheduler::new(coordinator.clone(), store.clone(), config);

        let watched = scheduler.clone();
        let exhaustion_watch = events.subscribe(move |event| {
            if let SessionEvent::AuthenticationRequired { .. } = event {
                watched.stop();
            }
        });

        Self {
            api,
            store,
            events,
            coordinator,
            pipeline,
            scheduler,
            exhaustion_watch,
        }
    }

    /// HTTP transport, HTTP auth endpoints and a file store under
    /// `config.storage_dir`.
    pub fn from_config(config: SessionConfig) -> Result<Self, HearthError> {
        let client = build_client(HTTP_TIMEOUT)?;
        let api = Arc::new(HttpAuthApi::new(client.clone(), config.base_url.clone()));
        let transport = Arc::new(HttpTransport::new(client, config.base_url.clone()));
        let store = Arc::new(FileCredentialStore::new(config.storage_dir.clone()));
        Ok(Self::new(&config, api, transport, store, SessionEventBus::new()))
    }

    pub fn events(&self) -> &SessionEventBus {
        &self.events
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &ProactiveRefreshScheduler {
        &self.scheduler
    }

    /// Authenticate an existing account and start proactive refresh.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, SessionError> {
        let response = self.api.login(request).await?;
        self.establish(&response, SessionMeta::default()).await?;
        tracing::info!("Logged in");
        Ok(response)
    }

    /// Create an account. Starts the registration grace period.
    pub async fn register(&self, request: &LoginRequest) -> Result<LoginResponse, SessionError> {
        let response = self.api.register(request).await?;
        self.establish(&response, SessionMeta::registered(Utc::now()))
            .await?;
        tracing::info!("Registered new account");
        Ok(response)
    }

    async fn establish(
        &self,
        response: &LoginResponse,
        meta: SessionMeta,
    ) -> Result<(), SessionError> {
        self.coordinator.begin_session(&response.credential()).await?;
        save_session_meta(self.store.as_ref(), &meta).await?;
        match &response.user {
            Some(user) => {
                self.store
                    .set(SecretKey::UserRecord, &user.to_string())
                    .await?
            }
            None => self.store.delete(SecretKey::UserRecord).await?,
        }
        self.scheduler.start().await;
        Ok(())
    }

    /// Resume a persisted session at process start.
    pub async fn restore(&self) -> bool {
        if read_or_absent(self.store.as_ref(), SecretKey::RefreshToken)
            .await
            .is_none()
        {
            tracing::debug!("No persisted session to restore");
            return false;
        }
        self.scheduler.start().await;
        tracing::info!("Restored persisted session");
        true
    }

    /// End the session without waiting for any in-flight refresh.
    pub async fn logout(&self) -> Result<(), SessionError> {
        self.scheduler.stop();
        self.coordinator.end_session().await?;
        tracing::info!("Logged out");
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        load_credential(self.store.as_ref()).await.is_some() && !self.coordinator.is_exhausted()
    }

    pub async fn current_user(&self) -> Option<serde_json::Value> {
        let raw = read_or_absent(self.store.as_ref(), SecretKey::UserRecord).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn select_family(&self, family_id: &str) -> Result<(), SessionError> {
        self.store.set(SecretKey::SelectedFamily, family_id).await
    }

    pub async fn selected_family(&self) -> Option<String> {
        read_or_absent(self.store.as_ref(), SecretKey::SelectedFamily).await
    }

    /// Shorthand for [`RequestPipeline::send`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HearthError> {
        self.pipeline.send(request).await
    }

    /// Application teardown: stop the timer and drop every event subscriber.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.events.clear();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.exhaustion_watch.unsubscribe();
        self.scheduler.stop();
    }
}
