//! Priority task queue
//!
//! Single-producer (detector), single-consumer (executor). Highest
//! priority first; ties break by insertion order via a monotonic
//! sequence number. `is_idle` also covers the task currently being
//! executed, so the detector never stacks analysis cycles on top of
//! in-flight work.

use crate::execution::task::Task;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

struct QueuedTask {
    seq: u64,
    task: Box<dyn Task>,
}

#[derive(Default)]
struct QueueInner {
    next_seq: u64,
    items: Vec<QueuedTask>,
}

pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    running: AtomicBool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn push(&self, task: Box<dyn Task>) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.items.push(QueuedTask { seq, task });
    }

    /// Remove and return the next task: highest priority, then oldest.
    pub fn take_next(&self) -> Option<Box<dyn Task>> {
        let mut inner = self.inner.lock();
        let idx = inner
            .items
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.task
                    .priority()
                    .cmp(&b.task.priority())
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;
        Some(inner.items.remove(idx).task)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// True when nothing is queued and nothing is executing.
    pub fn is_idle(&self) -> bool {
        !self.running.load(Ordering::SeqCst) && self.is_empty()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct StubTask {
        label: &'static str,
        priority: u8,
    }

    #[async_trait]
    impl Task for StubTask {
        fn name(&self) -> String {
            self.label.to_string()
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        async fn run(&self) -> Result<String> {
            Ok(String::new())
        }
    }

    fn stub(label: &'static str, priority: u8) -> Box<dyn Task> {
        Box::new(StubTask { label, priority })
    }

    #[test]
    fn test_priority_order() {
        let queue = TaskQueue::new();
        queue.push(stub("low", 3));
        queue.push(stub("lowest", 1));
        queue.push(stub("high", 5));

        assert_eq!(queue.take_next().unwrap().name(), "high");
        assert_eq!(queue.take_next().unwrap().name(), "low");
        assert_eq!(queue.take_next().unwrap().name(), "lowest");
        assert!(queue.take_next().is_none());
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let queue = TaskQueue::new();
        queue.push(stub("first", 5));
        queue.push(stub("second", 5));
        queue.push(stub("third", 5));

        assert_eq!(queue.take_next().unwrap().name(), "first");
        assert_eq!(queue.take_next().unwrap().name(), "second");
        assert_eq!(queue.take_next().unwrap().name(), "third");
    }

    #[test]
    fn test_idle_covers_running_task() {
        let queue = TaskQueue::new();
        assert!(queue.is_idle());

        queue.push(stub("work", 1));
        assert!(!queue.is_idle());

        let _task = queue.take_next().unwrap();
        queue.set_running(true);
        // Queue is empty but a task is in flight.
        assert!(queue.is_empty());
        assert!(!queue.is_idle());

        queue.set_running(false);
        assert!(queue.is_idle());
    }
}
