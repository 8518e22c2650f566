//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::HearthError;

/// Wrap a fallible future with a deadline.
///
/// Expiry is reported as [`HearthError::Timeout`]; the inner error type only
/// needs to convert into [`HearthError`].
pub async fn with_timeout<T, E>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, HearthError>
where
    E: Into<HearthError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(HearthError::Timeout(duration.as_millis() as u64)),
    }
}
