//! Task Executors
//!
//! Bounded worker pools and executor adaptors used to keep bulk computation off
//! the real-time slot thread.

pub mod sync_task_executor;
pub mod task_strand;
pub mod task_worker_pool;

pub use sync_task_executor::SyncTaskExecutor;
pub use task_strand::TaskStrand;
pub use task_worker_pool::{TaskWorkerPool, TaskWorkerPoolConfig, TaskWorkerPoolExecutor};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Deferred unit of work, executed exactly once
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Executor errors
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Invalid executor configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Failed to set real-time priority: {0}")]
    PriorityElevation(String),
}

/// Something that runs tasks
///
/// `execute` may run the task inline when the caller context allows it, `defer`
/// always queues it. Both return `false` when the task was rejected.
pub trait TaskExecutor: Send + Sync {
    /// Run the task, possibly inline
    fn execute(&self, task: Task) -> bool;

    /// Queue the task for later execution
    fn defer(&self, task: Task) -> bool;
}

impl<T: TaskExecutor + ?Sized> TaskExecutor for Arc<T> {
    fn execute(&self, task: Task) -> bool {
        (**self).execute(task)
    }

    fn defer(&self, task: Task) -> bool {
        (**self).defer(task)
    }
}

/// Executor that runs every task on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTaskExecutor;

impl TaskExecutor for InlineTaskExecutor {
    fn execute(&self, task: Task) -> bool {
        task();
        true
    }

    fn defer(&self, task: Task) -> bool {
        task();
        true
    }
}

/// SCHED_FIFO priority for real-time threads (1-99)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealTimePriority(pub u8);

impl RealTimePriority {
    /// Highest priority available to SCHED_FIFO threads
    pub const MAX: Self = Self(99);

    /// Priority `offset` levels below the maximum
    pub fn max_minus(offset: u8) -> Self {
        Self(99u8.saturating_sub(offset).max(1))
    }
}

/// Elevate the calling thread to SCHED_FIFO with the given priority
#[cfg(target_os = "linux")]
pub fn set_current_thread_priority(priority: RealTimePriority) -> Result<(), ExecutorError> {
    let param = libc::sched_param {
        sched_priority: priority.0.clamp(1, 99) as libc::c_int,
    };
    // SAFETY: pthread_self() is always a valid handle for the calling thread and
    // param outlives the call.
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret != 0 {
        return Err(ExecutorError::PriorityElevation(
            std::io::Error::from_raw_os_error(ret).to_string(),
        ));
    }
    Ok(())
}

/// Elevate the calling thread to SCHED_FIFO with the given priority
#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_priority(_priority: RealTimePriority) -> Result<(), ExecutorError> {
    Err(ExecutorError::PriorityElevation(
        "real-time scheduling is only supported on Linux".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inline_executor_runs_on_caller() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = InlineTaskExecutor;

        let c = counter.clone();
        assert!(executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));
        let c = counter.clone();
        assert!(executor.defer(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })));

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_priority_helpers() {
        assert_eq!(RealTimePriority::max_minus(0), RealTimePriority::MAX);
        assert_eq!(RealTimePriority::max_minus(10), RealTimePriority(89));
        assert_eq!(RealTimePriority::max_minus(200), RealTimePriority(1));
    }
}
