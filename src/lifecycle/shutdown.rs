//! Shutdown coordination for a service process.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed point in time every shutdown step has to finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(grace: Duration) -> Self {
        Self(Instant::now() + grace)
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// Wait for `handle` until `deadline`, aborting the task on overrun.
///
/// Returns the task's output when it finished in time.
pub async fn join_until<T>(task: &str, mut handle: JoinHandle<T>, deadline: Deadline) -> Option<T> {
    match tokio::time::timeout(deadline.remaining(), &mut handle).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            tracing::error!(task, error = %e, "Task failed during shutdown");
            None
        }
        Err(_) => {
            tracing::warn!(task, "Task did not stop within the grace period, aborting");
            handle.abort();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_trigger() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }

    #[tokio::test]
    async fn finished_task_output_is_returned() {
        let handle = tokio::spawn(async { 7 });
        assert_eq!(join_until("quick", handle, Deadline::after(Duration::from_secs(1))).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _keep = tx;
            std::future::pending::<()>().await;
        });

        let joined = join_until("stuck", handle, Deadline::after(Duration::from_secs(2))).await;
        assert!(joined.is_none());
        // The aborted task drops its sender.
        assert!(rx.await.is_err());
    }
}
