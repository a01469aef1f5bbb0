use crate::run_state::RunState;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Spawn a background loop whose panic brings the whole agent down cleanly.
pub fn spawn_supervised<F>(name: &'static str, run_state: RunState, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            error!(
                task = name,
                panic = %panic_message(panic.as_ref()),
                "Background task panicked, shutting down"
            );
            run_state.request_shutdown();
        }
    })
}

pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    pub total: usize,
    pub aborted: usize,
    pub failed: usize,
}

/// Wait up to `timeout` for every handle, then abort whatever is left.
pub async fn join_with_deadline(
    mut handles: Vec<(&'static str, JoinHandle<()>)>,
    timeout: Duration,
) -> JoinSummary {
    let total = handles.len();
    let mut results: Vec<Option<std::result::Result<(), JoinError>>> =
        handles.iter().map(|_| None).collect();

    let joined = tokio::time::timeout(timeout, async {
        for (slot, (_, handle)) in results.iter_mut().zip(handles.iter_mut()) {
            *slot = Some(handle.await);
        }
    })
    .await;
    if joined.is_err() {
        debug!(timeout_ms = timeout.as_millis() as u64, "Graceful join window elapsed");
    }

    let mut aborted = 0;
    let mut failed = 0;
    for ((name, handle), slot) in handles.into_iter().zip(results) {
        let result = match slot {
            Some(result) => result,
            None => {
                warn!(task = name, "Task did not exit in graceful window, aborting");
                handle.abort();
                aborted += 1;
                handle.await
            }
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                debug!(task = name, "Task cancelled during shutdown");
            }
            Err(e) => {
                error!(task = name, error = %e, "Task panicked during shutdown");
                failed += 1;
            }
        }
    }

    if failed == 0 {
        info!(total, aborted, "Background tasks joined");
    } else {
        warn!(failed, total, aborted, "Background tasks joined with failures");
    }

    JoinSummary {
        total,
        aborted,
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panic_requests_shutdown() {
        let state = RunState::new();
        state.mark_running();
        let handle = spawn_supervised("boom", state.clone(), async {
            panic!("loop exploded");
        });
        handle.await.unwrap();
        assert!(state.shutdown_requested());
        assert!(!state.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_are_aborted_at_deadline() {
        let quick = tokio::spawn(async {});
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let started = tokio::time::Instant::now();

        let summary =
            join_with_deadline(vec![("quick", quick), ("stuck", stuck)], Duration::from_secs(2)).await;

        assert_eq!(
            summary,
            JoinSummary {
                total: 2,
                aborted: 1,
                failed: 0
            }
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_returns_when_last_task_finishes() {
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(30)).await;
        });
        let second = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(130)).await;
        });
        let started = tokio::time::Instant::now();

        let summary =
            join_with_deadline(vec![("first", first), ("second", second)], Duration::from_secs(10)).await;

        assert_eq!(summary.aborted, 0);
        assert_eq!(summary.failed, 0);
        // joined at completion, not on a polling tick
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(130));
        assert!(elapsed < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_panicked_task_counts_as_failed() {
        let boom = tokio::spawn(async {
            panic!("exploded after shutdown");
        });
        let summary = join_with_deadline(vec![("boom", boom)], Duration::from_secs(1)).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.aborted, 0);
    }

    #[test]
    fn test_panic_message_variants() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(s.as_ref()), "unknown panic");
    }
}
