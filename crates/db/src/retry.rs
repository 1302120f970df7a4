use std::future::Future;
use std::time::Duration;

use tracing::warn;

use ordertrack_core::config::RetryConfig;

use crate::repositories::RepositoryError;

/// Run `operation`, retrying with exponential backoff while it fails with a
/// conflict (duplicate generated code, concurrent reconciliation insert).
/// The final attempt's error is returned unchanged, so callers still see a
/// distinguishable conflict after the retry budget is spent.
pub async fn with_conflict_retry<T, F, Fut>(
    retry: &RetryConfig,
    operation: F,
) -> Result<T, RepositoryError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Err(error) if error.is_conflict() && attempt < retry.max_attempts => {
                warn!(attempt, max_attempts = retry.max_attempts, %error, "retrying after conflict");
                tokio::time::sleep(retry.backoff_delay(attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Request-scoped bound on a whole multi-step write.
pub async fn with_request_timeout<T, Fut>(limit: Duration, future: Fut) -> Result<T, RepositoryError>
where
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(RepositoryError::Timeout(limit)),
    }
}
