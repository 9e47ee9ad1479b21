//! Task Strand
//!
//! Serialises tasks on top of a shared executor. Tasks pushed to one strand run
//! one at a time and in push order, on whichever worker picks the strand up.
//! Different strands still run in parallel.

use super::{Task, TaskExecutor};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

struct StrandQueue {
    tasks: VecDeque<Task>,
    /// A drain job is queued on, or running in, the inner executor
    scheduled: bool,
}

struct StrandState {
    name: String,
    capacity: usize,
    queue: Mutex<StrandQueue>,
}

impl StrandState {
    fn drain(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock();
                match queue.tasks.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.scheduled = false;
                        return;
                    }
                }
            };
            task();
        }
    }
}

/// Ordered view of a shared executor
pub struct TaskStrand<E> {
    inner: E,
    state: Arc<StrandState>,
}

impl<E: TaskExecutor> TaskStrand<E> {
    /// Strand holding at most `capacity` waiting tasks
    pub fn new(name: impl Into<String>, inner: E, capacity: usize) -> Self {
        Self {
            inner,
            state: Arc::new(StrandState {
                name: name.into(),
                capacity: capacity.max(1),
                queue: Mutex::new(StrandQueue {
                    tasks: VecDeque::new(),
                    scheduled: false,
                }),
            }),
        }
    }

    pub fn nof_pending_tasks(&self) -> usize {
        self.state.queue.lock().tasks.len()
    }

    fn enqueue(&self, task: Task, defer: bool) -> bool {
        {
            let mut queue = self.state.queue.lock();
            if queue.tasks.len() >= self.state.capacity {
                warn!(strand = %self.state.name, capacity = self.state.capacity, "Strand is full, task rejected");
                return false;
            }
            queue.tasks.push_back(task);
            if queue.scheduled {
                return true;
            }
            queue.scheduled = true;
        }

        let state = self.state.clone();
        let drain: Task = Box::new(move || state.drain());
        let accepted = if defer {
            self.inner.defer(drain)
        } else {
            self.inner.execute(drain)
        };

        if !accepted {
            // Nothing drains the strand now; everything queued on it is lost
            let discarded: Vec<Task> = {
                let mut queue = self.state.queue.lock();
                queue.scheduled = false;
                queue.tasks.drain(..).collect()
            };
            if discarded.len() > 1 {
                warn!(strand = %self.state.name, nof_tasks = discarded.len() - 1, "Strand tasks discarded");
            }
        }
        accepted
    }
}

impl<E: TaskExecutor> TaskExecutor for TaskStrand<E> {
    fn execute(&self, task: Task) -> bool {
        self.enqueue(task, false)
    }

    fn defer(&self, task: Task) -> bool {
        self.enqueue(task, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{InlineTaskExecutor, TaskWorkerPool, TaskWorkerPoolConfig, TaskWorkerPoolExecutor};
    use std::time::Duration;

    struct RejectingExecutor;

    impl TaskExecutor for RejectingExecutor {
        fn execute(&self, _task: Task) -> bool {
            false
        }

        fn defer(&self, _task: Task) -> bool {
            false
        }
    }

    fn pool(name: &str, nof_workers: usize) -> Arc<TaskWorkerPool> {
        Arc::new(TaskWorkerPool::new(TaskWorkerPoolConfig::new(name, nof_workers, 64)).unwrap())
    }

    #[test]
    fn test_tasks_run_in_push_order_on_many_workers() {
        let pool = pool("strand_order", 4);
        let strand = TaskStrand::new("sector0", TaskWorkerPoolExecutor::new(pool.clone()), 64);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20u64 {
            let order = order.clone();
            assert!(strand.execute(Box::new(move || {
                // Early tasks take longest
                std::thread::sleep(Duration::from_millis(20 - i));
                order.lock().push(i);
            })));
        }
        pool.wait_pending_tasks();

        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
        assert_eq!(strand.nof_pending_tasks(), 0);
    }

    #[test]
    fn test_strands_do_not_block_each_other() {
        let pool = pool("strand_parallel", 2);
        let slow = TaskStrand::new("slow", TaskWorkerPoolExecutor::new(pool.clone()), 8);
        let fast = TaskStrand::new("fast", TaskWorkerPoolExecutor::new(pool.clone()), 8);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        slow.execute(Box::new(move || {
            std::thread::sleep(Duration::from_millis(100));
            o.lock().push("slow");
        }));
        std::thread::sleep(Duration::from_millis(10));
        let o = order.clone();
        fast.execute(Box::new(move || o.lock().push("fast")));
        pool.wait_pending_tasks();

        assert_eq!(*order.lock(), vec!["fast", "slow"]);
    }

    #[test]
    fn test_inline_executor_runs_immediately() {
        let strand = TaskStrand::new("inline", InlineTaskExecutor, 4);
        let counter = Arc::new(Mutex::new(0));
        let c = counter.clone();
        assert!(strand.execute(Box::new(move || *c.lock() += 1)));
        assert_eq!(*counter.lock(), 1);
        assert_eq!(strand.nof_pending_tasks(), 0);
    }

    #[test]
    fn test_full_strand_rejects() {
        let pool = pool("strand_full", 1);
        let strand = TaskStrand::new("full", TaskWorkerPoolExecutor::new(pool.clone()), 2);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        // Occupies the strand so later tasks wait in its queue
        assert!(strand.execute(Box::new(move || {
            let _ = release_rx.recv();
        })));
        std::thread::sleep(Duration::from_millis(20));
        assert!(strand.execute(Box::new(|| {})));
        assert!(strand.execute(Box::new(|| {})));
        assert!(!strand.execute(Box::new(|| {})));

        release_tx.send(()).unwrap();
        pool.wait_pending_tasks();
        assert_eq!(strand.nof_pending_tasks(), 0);
    }

    #[test]
    fn test_rejected_drain_empties_strand() {
        let strand = TaskStrand::new("rejected", RejectingExecutor, 4);
        assert!(!strand.execute(Box::new(|| {})));
        assert_eq!(strand.nof_pending_tasks(), 0);
        assert!(!strand.defer(Box::new(|| {})));
    }
}
