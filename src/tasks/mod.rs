//! Bounded fire-and-forget background task queue.
//!
//! Post-login side effects (new-device checks, evasion scoring, trust
//! re-evaluation, notifications) run here so the request path never waits
//! on them. Every task gets a bounded timeout, every failure is logged and
//! swallowed, and a full queue drops the task rather than blocking the
//! caller.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct Task {
    name: &'static str,
    future: TaskFuture,
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
}

impl TaskQueue {
    /// Spawn the worker loop and return the enqueue handle. Dropping every
    /// handle shuts the worker down once the queue drains.
    #[must_use]
    pub fn start(capacity: usize, task_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Task>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                match tokio::time::timeout(task_timeout, task.future).await {
                    Ok(Ok(())) => debug!(task = task.name, "background task done"),
                    Ok(Err(err)) => {
                        warn!(task = task.name, error = %err, "background task failed");
                    }
                    Err(_) => warn!(task = task.name, "background task timed out"),
                }
            }
        });
        Self { tx }
    }

    /// Enqueue without waiting. If the queue is saturated the task is
    /// dropped with a warning; backpressure must never reach the request.
    pub fn dispatch<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task = Task {
            name,
            future: Box::pin(future),
        };
        if let Err(err) = self.tx.try_send(task) {
            let task_name = match &err {
                mpsc::error::TrySendError::Full(task)
                | mpsc::error::TrySendError::Closed(task) => task.name,
            };
            warn!(task = task_name, "background queue saturated, task dropped");
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::TaskQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn dispatched_tasks_run() {
        let queue = TaskQueue::start(8, Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            queue.dispatch("count", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_worker() {
        let queue = TaskQueue::start(8, Duration::from_secs(1));
        queue.dispatch("boom", async { Err(anyhow::anyhow!("boom")) });

        let counter = Arc::new(AtomicUsize::new(0));
        let after = counter.clone();
        queue.dispatch("after", async move {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_task_is_abandoned() {
        let queue = TaskQueue::start(8, Duration::from_millis(20));
        queue.dispatch("slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let counter = Arc::new(AtomicUsize::new(0));
        let after = counter.clone();
        queue.dispatch("after", async move {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
