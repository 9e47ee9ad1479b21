//! Task Worker Pool
//!
//! Fixed set of OS threads draining a single bounded task queue. A full queue is
//! reported back to the caller instead of blocking it, so the slot-boundary
//! thread can decide to drop or degrade work under overload.

use super::{set_current_thread_priority, ExecutorError, RealTimePriority, Task, TaskExecutor};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct TaskWorkerPoolConfig {
    /// Pool name, used for thread names and logs
    pub name: String,
    /// Number of worker threads
    pub nof_workers: usize,
    /// Maximum number of queued tasks
    pub queue_capacity: usize,
    /// Optional SCHED_FIFO priority for the workers
    pub priority: Option<RealTimePriority>,
}

impl TaskWorkerPoolConfig {
    /// Create a configuration without real-time priority
    pub fn new(name: impl Into<String>, nof_workers: usize, queue_capacity: usize) -> Self {
        Self {
            name: name.into(),
            nof_workers,
            queue_capacity,
            priority: None,
        }
    }

    /// Run the workers with real-time priority
    pub fn with_priority(mut self, priority: RealTimePriority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Fixed thread pool with a bounded task queue
pub struct TaskWorkerPool {
    name: String,
    nof_workers: usize,
    queue_capacity: usize,
    /// Queue input; `None` once the pool is stopped
    sender: RwLock<Option<Sender<Task>>>,
    /// Dropped on stop to wake up blocked producers
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    receiver: Receiver<Task>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl TaskWorkerPool {
    /// Spawn the worker threads
    pub fn new(config: TaskWorkerPoolConfig) -> Result<Self, ExecutorError> {
        if config.nof_workers == 0 {
            return Err(ExecutorError::InvalidConfiguration(format!(
                "worker pool '{}' needs at least one worker",
                config.name
            )));
        }
        if config.queue_capacity == 0 {
            return Err(ExecutorError::InvalidConfiguration(format!(
                "worker pool '{}' needs a non-zero queue capacity",
                config.name
            )));
        }

        let (sender, receiver) = bounded::<Task>(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let pool = Self {
            name: config.name.clone(),
            nof_workers: config.nof_workers,
            queue_capacity: config.queue_capacity,
            sender: RwLock::new(Some(sender)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            receiver: receiver.clone(),
            workers: Mutex::new(Vec::with_capacity(config.nof_workers)),
            stopped: AtomicBool::new(false),
        };

        for index in 0..config.nof_workers {
            let receiver = receiver.clone();
            let pool_name = config.name.clone();
            let priority = config.priority;
            let spawned = std::thread::Builder::new()
                .name(format!("{}#{}", config.name, index))
                .spawn(move || worker_loop(&pool_name, index, receiver, priority));

            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.stop();
                    return Err(ExecutorError::SpawnFailed(e));
                }
            }
        }

        info!(
            pool = %config.name,
            nof_workers = config.nof_workers,
            queue_capacity = config.queue_capacity,
            priority = ?config.priority,
            "Task worker pool started"
        );

        Ok(pool)
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads
    pub fn nof_workers(&self) -> usize {
        self.nof_workers
    }

    /// Queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Number of tasks waiting in the queue
    pub fn nof_pending_tasks(&self) -> usize {
        self.receiver.len()
    }

    /// True once `stop()` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Enqueue a task without blocking
    ///
    /// Returns `false` when the queue is full or the pool is stopped.
    pub fn push_task(&self, task: Task) -> bool {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            debug!(pool = %self.name, "Task rejected, pool is stopped");
            return false;
        };

        match sender.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    pool = %self.name,
                    capacity = self.queue_capacity,
                    "Task queue is full, task dropped"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(pool = %self.name, "Task rejected, queue is closed");
                false
            }
        }
    }

    /// Enqueue a task, waiting for space in the queue
    ///
    /// Returns `false` and discards the task if the pool is stopped before the
    /// task could be queued.
    pub fn push_task_blocking(&self, task: Task) -> bool {
        // Clone so that stop() can close the queue while this call is blocked
        let Some(sender) = self.sender.read().clone() else {
            debug!(pool = %self.name, "Task discarded, pool is stopped");
            return false;
        };

        select! {
            send(sender, task) -> res => res.is_ok(),
            recv(self.shutdown_rx) -> _ => {
                debug!(pool = %self.name, "Task discarded, pool is stopping");
                false
            }
        }
    }

    /// Block until every task enqueued before this call has completed
    ///
    /// Queues one sentinel per worker. Each worker parks on its sentinel until
    /// all of them arrived, which can only happen once every earlier task left
    /// the queue and finished.
    pub fn wait_pending_tasks(&self) {
        let rendezvous = Arc::new(Rendezvous::new(self.nof_workers));

        for _ in 0..self.nof_workers {
            let sentinel = rendezvous.clone();
            if !self.push_task_blocking(Box::new(move || sentinel.arrive_and_wait())) {
                rendezvous.abort();
                debug!(pool = %self.name, "Stopped while waiting for pending tasks");
                return;
            }
        }

        rendezvous.wait();
    }

    /// Close the queue and join every worker
    ///
    /// Tasks already queued are still executed. Calling this more than once has
    /// no further effect.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(pool = %self.name, pending = self.receiver.len(), "Stopping task worker pool");

        self.shutdown_tx.lock().take();
        self.sender.write().take();

        let current = std::thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.thread().id() == current {
                warn!(pool = %self.name, "Worker pool stopped from one of its own workers");
                continue;
            }
            if handle.join().is_err() {
                error!(pool = %self.name, "Worker thread panicked");
            }
        }

        debug!(pool = %self.name, "Task worker pool stopped");
    }
}

impl Drop for TaskWorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(pool: &str, index: usize, receiver: Receiver<Task>, priority: Option<RealTimePriority>) {
    if let Some(priority) = priority {
        if let Err(e) = set_current_thread_priority(priority) {
            warn!(pool, index, "Running worker without real-time priority: {}", e);
        }
    }

    debug!(pool, index, "Worker started");

    // Ends once the queue is closed and drained
    for task in receiver.iter() {
        task();
    }

    debug!(pool, index, "Worker finished");
}

/// Meeting point for the `wait_pending_tasks` sentinels
struct Rendezvous {
    expected: usize,
    state: Mutex<RendezvousState>,
    cvar: Condvar,
}

#[derive(Default)]
struct RendezvousState {
    arrived: usize,
    aborted: bool,
}

impl Rendezvous {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            state: Mutex::new(RendezvousState::default()),
            cvar: Condvar::new(),
        }
    }

    fn arrive_and_wait(&self) {
        let mut state = self.state.lock();
        state.arrived += 1;
        self.cvar.notify_all();
        while state.arrived < self.expected && !state.aborted {
            self.cvar.wait(&mut state);
        }
    }

    fn wait(&self) {
        let mut state = self.state.lock();
        while state.arrived < self.expected && !state.aborted {
            self.cvar.wait(&mut state);
        }
    }

    fn abort(&self) {
        self.state.lock().aborted = true;
        self.cvar.notify_all();
    }
}

/// Executor view of a worker pool
///
/// Both `execute` and `defer` enqueue without blocking.
#[derive(Clone)]
pub struct TaskWorkerPoolExecutor {
    pool: Arc<TaskWorkerPool>,
}

impl TaskWorkerPoolExecutor {
    pub fn new(pool: Arc<TaskWorkerPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<TaskWorkerPool> {
        &self.pool
    }
}

impl TaskExecutor for TaskWorkerPoolExecutor {
    fn execute(&self, task: Task) -> bool {
        self.pool.push_task(task)
    }

    fn defer(&self, task: Task) -> bool {
        self.pool.push_task(task)
    }
}
