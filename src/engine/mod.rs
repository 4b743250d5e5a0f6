pub mod coordinator;
pub mod matcher;
pub mod notifier;
pub mod queue;

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::error::AppError;
use crate::store::StoreResult;

/// Runs a read-only store query under `limit`. Failures and timeouts both
/// surface as `UpstreamUnavailable`: the caller abandons the round.
pub(crate) async fn bounded_read<T, F>(what: &str, limit: Duration, query: F) -> Result<T, AppError>
where
    F: Future<Output = StoreResult<T>>,
{
    match timeout(limit, query).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::UpstreamUnavailable(format!("{what}: {err}"))),
        Err(_) => Err(AppError::UpstreamUnavailable(format!(
            "{what} did not answer within {}ms",
            limit.as_millis()
        ))),
    }
}
