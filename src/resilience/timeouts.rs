//! Deadlines for external calls.

use std::future::Future;
use std::time::Duration;

use crate::resilience::errors::UpstreamError;

/// Run `fut` with a deadline; expiry becomes [`UpstreamError::Timeout`].
pub async fn with_timeout<T, F>(deadline: Duration, fut: F) -> Result<T, UpstreamError>
where
    F: Future<Output = Result<T, UpstreamError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout(deadline)),
    }
}
