//! Store call deadlines.

use std::future::Future;
use std::time::Duration;

use crate::domain::{AuthError, StoreError};

/// Run a port call under `timeout`. Elapsed maps to `AuthError::Timeout`.
pub(crate) async fn with_deadline<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "Store deadline elapsed");
            Err(AuthError::Timeout(operation.to_string()))
        }
    }
}
