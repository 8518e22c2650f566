//! Single-flight refresh-token exchange with a bounded retry budget.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};

use super::error::SessionError;
use super::events::{SessionEvent, SessionEventBus};
use super::store::{
    clear_session, load_session_meta, read_or_absent, record_refresh_time, save_credential,
    CredentialStore, SecretKey,
};
use super::token::Credential;
use crate::config::SessionConfig;
use crate::error::HearthError;
use crate::transport::AuthApi;
use crate::util::timeout::with_timeout;

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, SessionError>>>;

/// Point-in-time view of the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudgetSnapshot {
    pub consecutive_failures: u32,
    pub max_failures: u32,
    pub exhaustion_signaled: bool,
    pub in_flight: bool,
}

impl RetryBudgetSnapshot {
    pub fn is_exhausted(&self) -> bool {
        self.consecutive_failures >= self.max_failures
    }
}

#[derive(Default)]
struct BudgetState {
    consecutive_failures: u32,
    exhaustion_signaled: bool,
    in_flight: Option<(u64, SharedRefresh)>,
    next_attempt: u64,
    /// Bumped by `reset`; refreshes started under an older epoch are discarded.
    epoch: u64,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    events: SessionEventBus,
    max_failures: u32,
    grace_window: chrono::Duration,
    refresh_timeout: Duration,
    state: Mutex<BudgetState>,
    /// Serializes credential writes against login/logout.
    persist: tokio::sync::Mutex<()>,
}

/// Performs refresh-token exchanges on behalf of every caller in the process.
///
/// Concurrent [`refresh`](Self::refresh) calls share one exchange. After
/// `max_failures` consecutive failed exchanges the coordinator refuses to
/// touch the network until [`reset`](Self::reset) (login or logout).
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("budget", &self.snapshot())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
        events: SessionEventBus,
        config: &SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                events,
                max_failures: config.max_failures,
                grace_window: config.grace_window(),
                refresh_timeout: config.refresh_timeout,
                state: Mutex::new(BudgetState::default()),
                persist: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Obtain a fresh credential, joining any refresh already in flight.
    ///
    /// The in-flight slot is claimed before any storage access, so every
    /// caller that overlaps an attempt shares its outcome, including grace
    /// and exhaustion refusals.
    pub async fn refresh(&self) -> Result<Credential, SessionError> {
        let shared = {
            let mut state = self.inner.lock_state();
            let pending = state.in_flight.as_ref().map(|(_, pending)| pending.clone());
            match pending {
                Some(pending) => {
                    tracing::debug!("Joining in-flight refresh");
                    pending
                }
                None => self.start_attempt(&mut state),
            }
        };
        shared.await
    }

    fn start_attempt(&self, state: &mut BudgetState) -> SharedRefresh {
        let attempt = state.next_attempt;
        state.next_attempt += 1;
        let epoch = state.epoch;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_attempt(epoch, attempt).await });

        let inner = Arc::clone(&self.inner);
        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    inner.clear_slot(&mut inner.lock_state(), attempt);
                    Err(SessionError::RefreshNetworkError(format!(
                        "Refresh task aborted: {join_err}"
                    )))
                }
            }
        }
        .boxed()
        .shared();
        state.in_flight = Some((attempt, shared.clone()));
        shared
    }

    /// Clear the failure counter and exhaustion flag and detach any
    /// in-flight refresh without waiting for it. Its waiters receive
    /// [`SessionError::SessionEnded`] and its result is not persisted.
    pub fn reset(&self) {
        let mut state = self.inner.lock_state();
        state.consecutive_failures = 0;
        state.exhaustion_signaled = false;
        state.in_flight = None;
        state.epoch += 1;
        tracing::debug!(epoch = state.epoch, "Refresh coordinator reset");
    }

    /// Reset and persist credentials from a successful login.
    pub async fn begin_session(&self, credential: &Credential) -> Result<(), SessionError> {
        self.reset();
        let _guard = self.inner.persist.lock().await;
        save_credential(self.inner.store.as_ref(), credential).await?;
        if credential.refresh_token.is_none() {
            // A previous account's refresh token must not outlive its session.
            self.inner.store.delete(SecretKey::RefreshToken).await?;
        }
        record_refresh_time(self.inner.store.as_ref(), Utc::now()).await;
        Ok(())
    }

    /// Reset and remove every persisted secret.
    pub async fn end_session(&self) -> Result<(), SessionError> {
        self.reset();
        let _guard = self.inner.persist.lock().await;
        clear_session(self.inner.store.as_ref()).await
    }

    pub fn snapshot(&self) -> RetryBudgetSnapshot {
        let state = self.inner.lock_state();
        RetryBudgetSnapshot {
            consecutive_failures: state.consecutive_failures,
            max_failures: self.inner.max_failures,
            exhaustion_signaled: state.exhaustion_signaled,
            in_flight: state.in_flight.is_some(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.snapshot().is_exhausted()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_all(&self, events: impl IntoIterator<Item = SessionEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    /// Fail fast when the budget is spent. Only the first refusal of an
    /// exhaustion carries an `AuthenticationRequired` event.
    fn check_exhausted(
        &self,
        state: &mut BudgetState,
    ) -> Option<(SessionError, Option<SessionEvent>)> {
        if state.consecutive_failures < self.max_failures {
            return None;
        }
        let retry_count = state.consecutive_failures;
        let event = if state.exhaustion_signaled {
            None
        } else {
            state.exhaustion_signaled = true;
            tracing::error!(retry_count, "Refresh retry budget exhausted");
            Some(SessionEvent::AuthenticationRequired { retry_count })
        };
        Some((SessionError::RetryBudgetExhausted { retry_count }, event))
    }

    fn record_failure(&self, state: &mut BudgetState, error: &SessionError) -> Vec<SessionEvent> {
        state.consecutive_failures += 1;
        let retry_count = state.consecutive_failures;
        tracing::warn!(retry_count, max_failures = self.max_failures, error = %error, "Token refresh failed");

        let mut events = vec![SessionEvent::RefreshFailed {
            error: error.to_string(),
            retry_count,
        }];
        if retry_count >= self.max_failures && !state.exhaustion_signaled {
            state.exhaustion_signaled = true;
            tracing::error!(retry_count, "Refresh retry budget exhausted");
            events.push(SessionEvent::AuthenticationRequired { retry_count });
        }
        events
    }

    fn clear_slot(&self, state: &mut BudgetState, attempt: u64) {
        if matches!(state.in_flight, Some((current, _)) if current == attempt) {
            state.in_flight = None;
        }
    }

    /// Grace check, budget check and token read, then the exchange itself.
    async fn run_attempt(&self, epoch: u64, attempt: u64) -> Result<Credential, SessionError> {
        let meta = load_session_meta(self.store.as_ref()).await;
        if meta.in_grace_period(Utc::now(), self.grace_window) {
            tracing::debug!("Skipping refresh during registration grace period");
            self.clear_slot(&mut self.lock_state(), attempt);
            return Err(SessionError::GracePeriodActive);
        }

        let refused = {
            let mut state = self.lock_state();
            let refused = self.check_exhausted(&mut state);
            if refused.is_some() {
                self.clear_slot(&mut state, attempt);
            }
            refused
        };
        if let Some((err, event)) = refused {
            self.emit_all(event);
            return Err(err);
        }

        let Some(refresh_token) = read_or_absent(self.store.as_ref(), SecretKey::RefreshToken).await
        else {
            let err = SessionError::NoRefreshToken;
            let events = {
                let mut state = self.lock_state();
                if state.epoch != epoch {
                    return Err(SessionError::SessionEnded);
                }
                self.clear_slot(&mut state, attempt);
                self.record_failure(&mut state, &err)
            };
            self.emit_all(events);
            return Err(err);
        };

        tracing::info!(attempt, "Starting token refresh");
        self.run_exchange(epoch, attempt, refresh_token).await
    }

    async fn run_exchange(
        &self,
        epoch: u64,
        attempt: u64,
        refresh_token: String,
    ) -> Result<Credential, SessionError> {
        let outcome = match with_timeout(
            self.refresh_timeout,
            self.api.refresh_exchange(&refresh_token),
        )
        .await
        {
            Ok(resp) => match resp.access_token.filter(|t| !t.is_empty()) {
                Some(access_token) => Ok(Credential::new(
                    access_token,
                    resp.refresh_token.or(Some(refresh_token)),
                )),
                None => Err(SessionError::RefreshInvalidResponse(
                    "Refresh response missing access token".to_string(),
                )),
            },
            Err(HearthError::Session(err)) => Err(err),
            Err(HearthError::Timeout(ms)) => Err(SessionError::RefreshNetworkError(format!(
                "Refresh timed out after {ms}ms"
            ))),
            Err(other) => Err(SessionError::RefreshNetworkError(other.to_string())),
        };

        let _guard = self.persist.lock().await;
        if self.lock_state().epoch != epoch {
            tracing::info!(attempt, "Discarding refresh result from an ended session");
            return Err(SessionError::SessionEnded);
        }

        if let Ok(credential) = &outcome {
            if let Err(err) = save_credential(self.store.as_ref(), credential).await {
                tracing::warn!(error = %err, "Refreshed credential could not be persisted");
            }
            record_refresh_time(self.store.as_ref(), Utc::now()).await;
        }

        let events = {
            let mut state = self.lock_state();
            self.clear_slot(&mut state, attempt);
            match &outcome {
                Ok(credential) => {
                    state.consecutive_failures = 0;
                    state.exhaustion_signaled = false;
                    tracing::info!(attempt, "Token refresh succeeded");
                    vec![SessionEvent::TokenRefreshed {
                        token: credential.access_token.clone(),
                    }]
                }
                Err(err) => self.record_failure(&mut state, err),
            }
        };
        self.emit_all(events);
        outcome
    }
}
