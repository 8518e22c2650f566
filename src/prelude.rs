//! Convenience re-exports for common use.

pub use crate::auth::{
    Credential, LoginRequest, RefreshCoordinator, RequestPipeline, SessionError, SessionEvent,
    SessionEventBus, SessionManager,
};
pub use crate::config::SessionConfig;
pub use crate::error::{HearthError, Result};
pub use crate::transport::{ApiRequest, ApiResponse};
