use std::future::Future;
use std::time::Duration;

use quill_store::StoreResult;

use crate::error::{CoreError, CoreResult};

/// Run a store call with an upper bound on its duration.
///
/// Elapsed calls become a transient storage error. Store errors are mapped
/// through `From<StoreError>`.
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> CoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::storage(
            format!("{what} timed out after {}ms", limit.as_millis()),
            true,
        )),
    }
}
