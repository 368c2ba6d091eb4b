//! Task execution: priority queue, single-flight executor, and the tasks
//! the detector enqueues.

pub mod executor;
pub mod queue;
pub mod task;
pub mod tasks;

pub use executor::TaskExecutor;
pub use queue::TaskQueue;
pub use task::Task;

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Typed failure taxonomy for task execution. Wrapped in `anyhow::Error`
/// on the way out; the executor logs and drops the task either way.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("insufficient funds: need {needed:.2} {asset}, have {available:.2}")]
    InsufficientFunds {
        asset: String,
        needed: f64,
        available: f64,
    },

    #[error("transfer gas cost ${cost:.2} exceeds safety cap ${cap:.2}")]
    GasSafetyAbort { cost: f64, cap: f64 },

    #[error("invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("timed out after {after:?} waiting for {operation}")]
    Timeout { operation: String, after: Duration },
}

/// Await `fut` for at most `after`, turning expiry into a definite
/// [`ExecutionError::Timeout`] instead of hanging the executor.
pub async fn with_timeout<T>(
    operation: &str,
    after: Duration,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::time::timeout(after, fut).await.map_err(|_| {
        ExecutionError::Timeout {
            operation: operation.to_string(),
            after,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout("quick op", Duration::from_secs(1), async { 42 })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires_with_typed_error() {
        let err = with_timeout(
            "stuck op",
            Duration::from_millis(10),
            futures::future::pending::<()>(),
        )
        .await
        .unwrap_err();

        match err.downcast_ref::<ExecutionError>() {
            Some(ExecutionError::Timeout { operation, .. }) => {
                assert_eq!(operation, "stuck op");
            }
            other => panic!("expected timeout error, got {:?}", other),
        }
    }
}
