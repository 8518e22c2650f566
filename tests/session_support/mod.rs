#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hearth::auth::{
    CredentialStore, LoginRequest, LoginResponse, MemoryCredentialStore, RefreshCoordinator,
    RefreshResponse, RequestPipeline, SecretKey, SessionError, SessionEvent, SessionEventBus,
    Subscription,
};
use hearth::config::SessionConfig;
use hearth::error::HearthError;
use hearth::transport::{ApiRequest, ApiResponse, AuthApi, Transport};
use reqwest::header::AUTHORIZATION;
use tokio::sync::Semaphore;

/// Scripted auth endpoints. Refresh outcomes are served from a queue, then
/// from the fallback. A closed gate holds exchanges in flight.
pub struct FakeAuthApi {
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    queued: Mutex<VecDeque<Result<RefreshResponse, SessionError>>>,
    fallback: Mutex<Result<RefreshResponse, SessionError>>,
    login: Mutex<Result<LoginResponse, SessionError>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeAuthApi {
    /// Every refresh issues `access_token` without rotating the refresh token.
    pub fn issuing(access_token: &str) -> Arc<Self> {
        Arc::new(Self::with_fallback(Ok(refresh_response(access_token, None))))
    }

    /// Every refresh fails with a network error.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self::with_fallback(Err(SessionError::RefreshNetworkError(
            "connection reset".to_string(),
        ))))
    }

    fn with_fallback(fallback: Result<RefreshResponse, SessionError>) -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            login: Mutex::new(Ok(login_response("stale", "refresh-1"))),
            gate: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, outcome: Result<RefreshResponse, SessionError>) {
        self.queued.lock().unwrap().push_back(outcome);
    }

    pub fn set_fallback(&self, outcome: Result<RefreshResponse, SessionError>) {
        *self.fallback.lock().unwrap() = outcome;
    }

    pub fn set_login(&self, response: Result<LoginResponse, SessionError>) {
        *self.login.lock().unwrap() = response;
    }

    /// Hold every subsequent exchange until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn open_gate(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS);
        }
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self, _request: &LoginRequest) -> Result<LoginResponse, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().unwrap().clone()
    }

    async fn register(&self, _request: &LoginRequest) -> Result<LoginResponse, SessionError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login.lock().unwrap().clone()
    }

    async fn refresh_exchange(&self, refresh_token: &str) -> Result<RefreshResponse, SessionError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let queued = self.queued.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }
}

pub fn refresh_response(access_token: &str, refresh_token: Option<&str>) -> RefreshResponse {
    RefreshResponse {
        access_token: Some(access_token.to_string()),
        refresh_token: refresh_token.map(str::to_string),
    }
}

pub fn login_response(access_token: &str, refresh_token: &str) -> LoginResponse {
    LoginResponse {
        access_token: access_token.to_string(),
        refresh_token: Some(refresh_token.to_string()),
        user: Some(serde_json::json!({ "id": 42, "email": "ada@example.com" })),
    }
}

/// One request as seen by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub retried: bool,
}

/// API server stand-in: 200 for accepted bearer tokens, 401 otherwise.
/// Fixed responses per path take precedence.
#[derive(Default)]
pub struct FakeTransport {
    accepted: Mutex<HashSet<String>>,
    fixed: Mutex<HashMap<String, ApiResponse>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl FakeTransport {
    pub fn accepting(tokens: &[&str]) -> Arc<Self> {
        let transport = Self::default();
        transport
            .accepted
            .lock()
            .unwrap()
            .extend(tokens.iter().map(|t| t.to_string()));
        Arc::new(transport)
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.fixed
            .lock()
            .unwrap()
            .insert(path.to_string(), ApiResponse::new(status, body));
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, HearthError> {
        let authorization = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.seen.lock().unwrap().push(SeenRequest {
            path: request.path.clone(),
            authorization: authorization.clone(),
            retried: request.retried,
        });

        if let Some(fixed) = self.fixed.lock().unwrap().get(request.endpoint()) {
            return Ok(fixed.clone());
        }
        let token = authorization
            .as_deref()
            .and_then(|v| v.strip_prefix("Bearer "));
        match token {
            Some(token) if self.accepted.lock().unwrap().contains(token) => Ok(ApiResponse::new(
                200,
                format!(r#"{{"path":"{}"}}"#, request.endpoint()),
            )),
            _ => Ok(ApiResponse::new(401, r#"{"message":"token expired"}"#)),
        }
    }
}

/// Collects every event published on a bus.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SessionEvent>>>,
    _subscription: Subscription,
}

impl EventRecorder {
    pub fn attach(bus: &SessionEventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

/// Coordinator and pipeline wired over the fakes and an in-memory store.
pub struct Harness {
    pub api: Arc<FakeAuthApi>,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<MemoryCredentialStore>,
    pub events: SessionEventBus,
    pub recorder: EventRecorder,
    pub coordinator: RefreshCoordinator,
    pub pipeline: Arc<RequestPipeline>,
}

impl Harness {
    pub fn new(api: Arc<FakeAuthApi>, transport: Arc<FakeTransport>) -> Self {
        Self::with_config(api, transport, &SessionConfig::default())
    }

    pub fn with_config(
        api: Arc<FakeAuthApi>,
        transport: Arc<FakeTransport>,
        config: &SessionConfig,
    ) -> Self {
        let store = Arc::new(MemoryCredentialStore::new());
        let events = SessionEventBus::new();
        let recorder = EventRecorder::attach(&events);
        let coordinator =
            RefreshCoordinator::new(api.clone(), store.clone(), events.clone(), config);
        let pipeline = Arc::new(RequestPipeline::new(
            transport.clone(),
            store.clone(),
            coordinator.clone(),
            events.clone(),
            config,
        ));
        Self {
            api,
            transport,
            store,
            events,
            recorder,
            coordinator,
            pipeline,
        }
    }

    /// Store a signed-in credential pair.
    pub async fn sign_in(&self, access_token: &str, refresh_token: &str) {
        seed(self.store.as_ref(), access_token, Some(refresh_token)).await;
    }
}

pub async fn seed(store: &dyn CredentialStore, access_token: &str, refresh_token: Option<&str>) {
    store
        .set(SecretKey::AccessToken, access_token)
        .await
        .expect("seed access token");
    if let Some(refresh_token) = refresh_token {
        store
            .set(SecretKey::RefreshToken, refresh_token)
            .await
            .expect("seed refresh token");
    }
}

/// Memory store whose reads suspend for `delay`, like a disk or keychain.
pub struct SlowStore {
    inner: MemoryCredentialStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryCredentialStore::new(),
            delay,
        }
    }

    pub fn peek(&self, key: SecretKey) -> Option<String> {
        self.inner.peek(key)
    }
}

#[async_trait]
impl CredentialStore for SlowStore {
    async fn get(&self, key: SecretKey) -> Result<Option<String>, SessionError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: SecretKey, value: &str) -> Result<(), SessionError> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: SecretKey) -> Result<(), SessionError> {
        self.inner.delete(key).await
    }
}
