//! Supervised fire-and-forget work
//!
//! Everything that happens after a webhook response or a user decision has
//! been returned (persistence, provider redirects, notification fan-out) is
//! spawned here. Each job gets a supervisor that logs its error or panic,
//! so nothing is silently dropped and nothing propagates back into the
//! request path. The tracker lets shutdown wait for outstanding jobs.

use callhub_core::AppResult;
use std::future::Future;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Tracked background task spawner
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn `future` as a supervised background job for `call_id`
    pub fn spawn<F>(&self, task: &'static str, call_id: &str, future: F)
    where
        F: Future<Output = AppResult<()>> + Send + 'static,
    {
        let call_id = call_id.to_string();
        let job = tokio::spawn(future);

        self.tracker.spawn(async move {
            match job.await {
                Ok(Ok(())) => debug!(task, call_id = %call_id, "Background task finished"),
                Ok(Err(e)) => error!(
                    task,
                    call_id = %call_id,
                    error = %e,
                    error_code = e.error_code(),
                    "Background task failed"
                ),
                Err(join_error) if join_error.is_panic() => {
                    error!(task, call_id = %call_id, "Background task panicked")
                }
                Err(_) => warn!(task, call_id = %call_id, "Background task cancelled"),
            }
        });
    }

    /// Number of jobs still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every job (including jobs spawned meanwhile) has finished.
    ///
    /// Returns `false` if `grace` elapsed first.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();

        if !finished {
            warn!(
                in_flight = self.tracker.len(),
                "Background tasks still running after grace period"
            );
        }
        finished
    }

    /// Wait for all outstanding jobs without a deadline
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callhub_core::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settle_waits_for_jobs() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let done = done.clone();
            tasks.spawn("count", "CA1", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        tasks.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_contained() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("fails", "CA1", async { Err(AppError::Database("down".into())) });
        tasks.spawn("panics", "CA2", async {
            let fail = true;
            if fail {
                panic!("boom");
            }
            Ok(())
        });

        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        tasks.spawn("ok", "CA3", async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tasks.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("slow", "CA1", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        assert!(!tasks.drain(Duration::from_secs(1)).await);
        assert!(tasks.drain(Duration::from_secs(120)).await);
    }
}
