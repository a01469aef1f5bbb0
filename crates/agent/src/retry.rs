use crate::health::HealthMonitor;
use flotilla_core::{Backoff, Error, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Repeat `attempt` until it succeeds or `cancel` fires.
///
/// Each failure is logged and reported to `health`, then the task sleeps for
/// the next backoff delay. Both the attempt and the sleep are raced against
/// cancellation, so shutdown is never held up by a long retry.
pub async fn retry_until_ok<T, F, Fut>(
    operation: &'static str,
    mut backoff: Backoff,
    cancel: &CancellationToken,
    health: &HealthMonitor,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = attempt() => outcome,
        };

        match outcome {
            Ok(value) => {
                if backoff.attempts() > 0 {
                    info!(operation, attempts = backoff.attempts() + 1, "Succeeded after retrying");
                }
                health.retry_cleared();
                return Ok(value);
            }
            Err(e) => {
                let delay = backoff.next_delay();
                health.retrying(operation, backoff.attempts(), &e);
                warn!(
                    operation,
                    attempt = backoff.attempts(),
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
