use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Process-wide run flag shared by the main loop, heartbeat and listener.
///
/// `running` flips on at most once (after registration) and off at shutdown.
/// The cancellation token wakes every loop that is parked on a sleep or a poll.
#[derive(Clone, Default)]
pub struct RunState {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    running: AtomicBool,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Ask every loop to stop at its next poll boundary. Idempotent.
    pub fn request_shutdown(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.shutdown.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.inner.shutdown.cancelled().await
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// `false -> true`, at most once per process. Refused after shutdown.
    pub(crate) fn mark_running(&self) -> bool {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.shutdown_requested() {
            return false;
        }
        self.inner.running.store(true, Ordering::Release);
        // lost a race with request_shutdown
        if self.shutdown_requested() {
            self.inner.running.store(false, Ordering::Release);
            return false;
        }
        true
    }
}
