//! In-process publish/subscribe for session lifecycle transitions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;

/// Session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A refresh exchange produced a new access token.
    TokenRefreshed { token: String },
    /// A refresh attempt failed; `retry_count` is the consecutive failure count.
    RefreshFailed { error: String, retry_count: u32 },
    /// The retry budget is exhausted and the user must log in again.
    AuthenticationRequired { retry_count: u32 },
    /// The server denied access for a reason unrelated to token validity.
    AccessDenied { details: String },
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokenRefreshed { .. } => "token_refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::AccessDenied { .. } => "access_denied",
        }
    }
}

/// Subscriber callback.
pub type SessionEventHandler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

type HandlerList = Mutex<Vec<(u64, SessionEventHandler)>>;

/// Event bus delivering [`SessionEvent`]s synchronously to every subscriber.
///
/// Construct one per application and hand clones to the components that
/// publish or listen; clones share the same subscriber list.
///
/// # Example
/// ```
/// use hearth::auth::{SessionEvent, SessionEventBus};
///
/// let bus = SessionEventBus::new();
/// let subscription = bus.subscribe(|event| println!("session: {}", event.kind()));
/// bus.emit(SessionEvent::AuthenticationRequired { retry_count: 5 });
/// subscription.unsubscribe();
/// ```
#[derive(Clone, Default)]
pub struct SessionEventBus {
    handlers: Arc<HandlerList>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for SessionEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers run in subscription order.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Deliver `event` to every current subscriber on the caller's task.
    ///
    /// A panicking handler is logged and skipped; later handlers still run
    /// and the panic does not reach the emitter.
    pub fn emit(&self, event: SessionEvent) {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<SessionEventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        tracing::debug!(event = event.kind(), subscribers = handlers.len(), "Emitting session event");
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(event = event.kind(), "Session event handler panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every subscriber (application shutdown).
    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Handle returned by [`SessionEventBus::subscribe`].
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl Subscription {
    /// Remove this registration. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let Some(handlers) = self.handlers.upgrade() else {
            return;
        };
        handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _)| *id != self.id);
    }
}
