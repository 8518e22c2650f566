//! Hearth session core
//!
//! Holds the signed-in user's access and refresh tokens, collapses concurrent
//! authorization failures into a single refresh exchange, bounds consecutive
//! refresh failures before forcing re-authentication, and broadcasts session
//! transitions to the rest of the client.
//!
//! # Quick Start
//!
//! ```no_run
//! use hearth::prelude::*;
//!
//! # async fn example() -> hearth::error::Result<()> {
//! let session = SessionManager::from_config(SessionConfig::from_env()?)?;
//! session.restore().await;
//! let feed: serde_json::Value = session
//!     .pipeline()
//!     .send_json(ApiRequest::get("/families/7/feed"))
//!     .await?;
//! println!("{feed}");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod transport;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
