use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::AppError;

/// Drive `fut` until it completes or `cancel` fires. On cancellation the
/// future is dropped, which aborts any in-flight HTTP request it owns.
pub async fn run_cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, AppError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Cancel `cancel` once `timeout` elapses. The returned handle can be aborted
/// when the guarded work finishes first.
pub fn cancel_after(cancel: CancellationToken, timeout: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => cancel.cancel(),
            _ = cancel.cancelled() => {}
        }
    })
}
