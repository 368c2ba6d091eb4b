//! Task executor
//!
//! Drains the queue one task at a time. Failed tasks are dropped with
//! full context logged and a best-effort notification; they are never
//! re-queued. Recovery is re-detection on the next analysis cycle, which
//! works because the detector re-reads balances before sizing anything.

use crate::execution::queue::TaskQueue;
use crate::execution::task::Task;
use crate::notify::Notifier;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Sleep between polls when the queue is empty.
const IDLE_SLEEP_SECS: u64 = 1;

pub struct TaskExecutor {
    queue: Arc<TaskQueue>,
    notifier: Notifier,
}

impl TaskExecutor {
    pub fn new(queue: Arc<TaskQueue>, notifier: Notifier) -> Self {
        Self { queue, notifier }
    }

    /// Main loop. Never returns.
    pub async fn run(&self) {
        info!("Task executor started");
        loop {
            match self.queue.take_next() {
                Some(task) => self.run_task(task).await,
                None => tokio::time::sleep(Duration::from_secs(IDLE_SLEEP_SECS)).await,
            }
        }
    }

    /// Run one task to completion, holding the running flag so the
    /// detector stays quiet for the duration.
    pub async fn run_task(&self, task: Box<dyn Task>) {
        let name = task.name();
        self.queue.set_running(true);
        info!("▶ Running task: {} (priority {})", name, task.priority());
        let started = Instant::now();

        match task.run().await {
            Ok(summary) => {
                info!("✅ Task {} done in {:.1}s: {}", name, started.elapsed().as_secs_f64(), summary);
                self.notifier.send(&format!("✅ {}: {}", name, summary)).await;
            }
            Err(e) => {
                error!("❌ Task {} failed (dropped): {:#}", name, e);
                self.notifier
                    .send(&format!("❌ {} failed: {:#}", name, e))
                    .await;
            }
        }

        self.queue.set_running(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Task for CountingTask {
        fn name(&self) -> String {
            "counting".to_string()
        }

        fn priority(&self) -> u8 {
            1
        }

        async fn run(&self) -> Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("boom");
            }
            Ok("ok".to_string())
        }
    }

    #[tokio::test]
    async fn test_failed_task_is_dropped_not_requeued() {
        let queue = Arc::new(TaskQueue::new());
        let executor = TaskExecutor::new(Arc::clone(&queue), Notifier::disabled());

        let runs = Arc::new(AtomicUsize::new(0));
        queue.push(Box::new(CountingTask {
            runs: Arc::clone(&runs),
            fail: true,
        }));

        let task = queue.take_next().unwrap();
        executor.run_task(task).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_queue_idle_after_success() {
        let queue = Arc::new(TaskQueue::new());
        let executor = TaskExecutor::new(Arc::clone(&queue), Notifier::disabled());

        let runs = Arc::new(AtomicUsize::new(0));
        queue.push(Box::new(CountingTask {
            runs: Arc::clone(&runs),
            fail: false,
        }));

        let task = queue.take_next().unwrap();
        executor.run_task(task).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(queue.is_idle());
    }
}
