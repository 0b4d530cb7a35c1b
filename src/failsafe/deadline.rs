//! Timeout and cancellation race for outbound calls
//!
//! The timer and the in-flight future are owned by the race; whichever of
//! deadline, cancellation or completion comes first drops the others, which
//! aborts the underlying request and clears the timer on every exit path.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

/// Run `fut` under a deadline and an optional cancellation token.
///
/// # Errors
///
/// Returns [`Error::Timeout`] when the deadline fires first,
/// [`Error::Cancelled`] when the token fires first, or the future's own error.
pub async fn with_deadline<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timed = tokio::time::timeout(timeout, fut);

    let outcome = match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(operation, "Outbound call cancelled");
                    return Err(Error::Cancelled(operation.to_string()));
                }
                outcome = timed => outcome,
            }
        }
        None => timed.await,
    };

    outcome.unwrap_or_else(|_| {
        debug!(operation, timeout_ms = timeout.as_millis(), "Outbound call timed out");
        Err(Error::Timeout {
            operation: operation.to_string(),
            timeout,
        })
    })
}
