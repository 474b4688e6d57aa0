//! Per-attempt deadlines for backend calls.

use std::future::Future;
use std::time::Duration;

use crate::transport::TransportError;

/// Run `fut` with a deadline, mapping expiry to [`TransportError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit)),
    }
}
