//! Side-effect executor.
//!
//! Notification dispatch and evidence finalization run as tracked
//! fire-and-forget tasks so the frame path never waits on network or disk.
//! Shutdown drains them for a grace period, then cancels the rest.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct SideEffects {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a task. It is dropped at its next await point once shutdown
    /// cancels outstanding work.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            warn!(task = name, "Side effect submitted after shutdown, dropping");
            return;
        }
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => warn!(task = name, "Side effect cancelled at shutdown"),
                _ = task => debug!(task = name, "Side effect complete"),
            }
        });
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task submitted so far, then accept new ones again.
    ///
    /// Evidence uploads only finish once their recording is stopped, so
    /// flushing while a recording is open waits for that recording.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting work, wait up to `grace`, then cancel what is left.
    /// Returns true if everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(
                pending = self.tracker.len(),
                grace_secs = grace.as_secs_f64(),
                "Side effects still pending after grace period, cancelling"
            );
        }
        self.cancel.cancel();
        self.tracker.wait().await;
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_flush_waits_for_submitted_tasks() {
        let effects = SideEffects::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            effects.spawn("count", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        effects.flush().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(effects.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_after_grace() {
        let effects = SideEffects::new();
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        effects.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!effects.shutdown(Duration::from_secs(1)).await);
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(effects.pending(), 0);

        // Work submitted after shutdown is refused
        let counter = Arc::clone(&done);
        effects.spawn("late", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(effects.pending(), 0);
    }
}
