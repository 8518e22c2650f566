//! Session and token lifecycle: storage, events, refresh, request pipeline.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod token;

pub use coordinator::{RefreshCoordinator, RetryBudgetSnapshot};
pub use error::SessionError;
pub use events::{SessionEvent, SessionEventBus, SessionEventHandler, Subscription};
pub use pipeline::{RequestPipeline, SkipList};
pub use scheduler::{ProactiveRefreshScheduler, ScheduleState};
pub use session::SessionManager;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, SecretKey};
pub use token::{Credential, LoginRequest, LoginResponse, RefreshResponse, SessionMeta};
