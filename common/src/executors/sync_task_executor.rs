//! Synchronous Task Executor
//!
//! Forces "run now and wait" semantics on top of an asynchronous executor. Meant
//! for bring-up, teardown and barriers, never for the per-slot path.

use super::{Task, TaskExecutor};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Pending,
    Finished,
    /// The inner executor dropped the task without running it
    Dropped,
}

struct Handshake {
    state: Mutex<Completion>,
    cvar: Condvar,
}

impl Handshake {
    fn signal(&self, completion: Completion) {
        let mut state = self.state.lock();
        if *state == Completion::Pending {
            *state = completion;
        }
        self.cvar.notify_one();
    }

    fn wait(&self) -> Completion {
        let mut state = self.state.lock();
        while *state == Completion::Pending {
            self.cvar.wait(&mut state);
        }
        *state
    }
}

/// Signals the waiting caller even if the task is dropped unexecuted
struct CompletionGuard {
    handshake: Arc<Handshake>,
    finished: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let completion = if self.finished {
            Completion::Finished
        } else {
            Completion::Dropped
        };
        self.handshake.signal(completion);
    }
}

/// Executor adaptor that blocks the caller until the task has run
pub struct SyncTaskExecutor<E> {
    inner: E,
}

impl<E: TaskExecutor> SyncTaskExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    fn run_and_wait(&self, task: Task) -> bool {
        let handshake = Arc::new(Handshake {
            state: Mutex::new(Completion::Pending),
            cvar: Condvar::new(),
        });

        let mut guard = CompletionGuard {
            handshake: handshake.clone(),
            finished: false,
        };
        let accepted = self.inner.execute(Box::new(move || {
            task();
            guard.finished = true;
            drop(guard);
        }));

        if !accepted {
            return false;
        }

        match handshake.wait() {
            Completion::Finished => true,
            _ => {
                warn!("Task was dropped by the inner executor before running");
                false
            }
        }
    }
}

impl<E: TaskExecutor> TaskExecutor for SyncTaskExecutor<E> {
    fn execute(&self, task: Task) -> bool {
        self.run_and_wait(task)
    }

    /// Same as `execute`: there is no deferral, the caller always waits
    fn defer(&self, task: Task) -> bool {
        self.run_and_wait(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{InlineTaskExecutor, TaskWorkerPool, TaskWorkerPoolConfig, TaskWorkerPoolExecutor};
    use std::sync::atomic::{AtomicUsize, Ordering};
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

    /// Accepts tasks and drops them without running
    struct DroppingExecutor;

    impl TaskExecutor for DroppingExecutor {
        fn execute(&self, task: Task) -> bool {
            drop(task);
            true
        }

        fn defer(&self, task: Task) -> bool {
            drop(task);
            true
        }
    }

    #[test]
    fn test_execute_waits_for_completion() {
        let pool = Arc::new(
            TaskWorkerPool::new(TaskWorkerPoolConfig::new("sync_test", 2, 8)).unwrap(),
        );
        let executor = SyncTaskExecutor::new(TaskWorkerPoolExecutor::new(pool));
        let counter = Arc::new(AtomicUsize::new(0));

        for expected in 1..=10 {
            let c = counter.clone();
            assert!(executor.execute(Box::new(move || {
                std::thread::sleep(Duration::from_millis(1));
                c.fetch_add(1, Ordering::SeqCst);
            })));
            assert_eq!(counter.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn test_defer_also_waits() {
        let pool = Arc::new(
            TaskWorkerPool::new(TaskWorkerPoolConfig::new("sync_defer", 1, 4)).unwrap(),
        );
        let executor = SyncTaskExecutor::new(TaskWorkerPoolExecutor::new(pool));
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        assert!(executor.defer(Box::new(move || {
            std::thread::sleep(Duration::from_millis(20));
            c.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_inner_executor() {
        let executor = SyncTaskExecutor::new(InlineTaskExecutor);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        assert!(executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_task_returns_false() {
        let executor = SyncTaskExecutor::new(RejectingExecutor);
        assert!(!executor.execute(Box::new(|| {})));
    }

    #[test]
    fn test_dropped_task_does_not_hang() {
        let executor = SyncTaskExecutor::new(DroppingExecutor);
        assert!(!executor.execute(Box::new(|| {})));
    }
}
