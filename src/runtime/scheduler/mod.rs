//! Rate-limited task dispatch
//!
//! This module provides the [`TaskManager`], a single-threaded dispatcher
//! that serializes task starts through one worker thread, enforces a minimum
//! interval between dispatches per rate-limit tag, and hands async tasks to a
//! bounded [`ExecutionPool`].
//!
//! # Flow
//!
//! ```text
//! caller thread          dispatch thread                 pool worker
//! ─────────────          ───────────────                 ───────────
//! submit(task) ──queue──▶ pop (FIFO)
//!   │                     wait for tag's rate budget
//!   │                     sync:  task.execute()
//!   │                     async: pool.submit(job) ─────▶ job()
//!   ◀──completion signal── task completes
//! value / error
//! ```

pub mod batch;
pub mod error;
pub mod pool;
mod queue;
pub mod rate_limit;
pub mod stats;
pub mod task;

pub use batch::{wait_for_futures, AcceptAll, BatchOutcome, ResponseClassifier, RetryCandidate};
pub use error::{is_transient, ApplicationFailure, CapturedError, ConnectionFailure, TaskError};
pub use pool::{ExecutionPool, PoolFuture, DEFAULT_MAX_WORKERS};
pub use rate_limit::{RateLimiter, RateLimits};
pub use stats::{DispatchStats, NoHooks, StatsSnapshot, TaskHooks, TracingHooks};
pub use task::{Completion, Task, TaskBuilder, TaskId, TaskIdGenerator, TaskInfo, TaskState};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info_span, trace};

use queue::{Envelope, WorkQueue};
use task::Dispatchable;

/// Task manager lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Constructed, not yet accepting work.
    Created,
    /// Dispatch thread alive, accepting submissions.
    Running,
    /// Stop requested; draining up to the sentinel.
    Stopping,
    /// Dispatch thread exited.
    Stopped,
}

impl ManagerState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => ManagerState::Running,
            2 => ManagerState::Stopping,
            3 => ManagerState::Stopped,
            _ => ManagerState::Created,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            ManagerState::Created => 0,
            ManagerState::Running => 1,
            ManagerState::Stopping => 2,
            ManagerState::Stopped => 3,
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of execution pool workers.
    pub max_workers: usize,
    /// Minimum dispatch intervals.
    pub rate_limits: RateLimits,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            rate_limits: RateLimits::unlimited(),
        }
    }
}

/// Single-threaded, rate-limited task dispatcher.
///
/// Create once per logical client, [`start`](TaskManager::start) once, and
/// share behind an `Arc`; any number of threads may submit concurrently
/// until [`stop`](TaskManager::stop).
pub struct TaskManager {
    name: String,
    state: Arc<AtomicU8>,
    // Held shared across the state check and push in `enqueue`, exclusively
    // while `stop` flips the state and queues the sentinel.
    gate: RwLock<()>,
    queue: WorkQueue,
    rate_limits: RateLimits,
    pool: Arc<ExecutionPool>,
    hooks: Arc<dyn TaskHooks>,
    stats: Arc<DispatchStats>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TaskManager {
    /// Create a task manager with default config.
    #[inline]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DispatcherConfig::default())
    }

    /// Create a task manager with custom configuration.
    pub fn with_config(
        name: impl Into<String>,
        config: DispatcherConfig,
    ) -> Self {
        let name = name.into();
        let pool = Arc::new(ExecutionPool::new(name.clone(), config.max_workers));

        Self {
            name,
            state: Arc::new(AtomicU8::new(ManagerState::Created.as_u8())),
            gate: RwLock::new(()),
            queue: WorkQueue::new(),
            rate_limits: config.rate_limits,
            pool,
            hooks: Arc::new(TracingHooks),
            stats: Arc::new(DispatchStats::default()),
            worker: Mutex::new(None),
        }
    }

    /// Replace the dispatch hooks. Only meaningful before `start`.
    pub fn with_hooks(
        mut self,
        hooks: Arc<dyn TaskHooks>,
    ) -> Self {
        self.hooks = hooks;
        self
    }

    /// Start the dispatch thread.
    pub fn start(&self) -> Result<(), TaskError> {
        if self
            .state
            .compare_exchange(
                ManagerState::Created.as_u8(),
                ManagerState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(TaskError::AlreadyStarted(self.name.clone()));
        }

        let dispatcher = Dispatcher {
            name: self.name.clone(),
            state: self.state.clone(),
            queue: self.queue.clone(),
            limiter: RateLimiter::new(self.rate_limits.clone()),
            pool: self.pool.clone(),
            hooks: self.hooks.clone(),
            stats: self.stats.clone(),
        };

        let spawned = thread::Builder::new()
            .name(format!("{}-dispatch", self.name))
            .spawn(move || dispatcher.run());

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.set_state(ManagerState::Stopped);
                Err(TaskError::Spawn(err.to_string()))
            }
        }
    }

    /// Stop the manager.
    ///
    /// Tasks queued before this call still run; later submissions fail with
    /// [`TaskError::ManagerStopped`]. Blocks until the dispatch thread exits
    /// and the pool has drained. An in-flight task is not interrupted.
    pub fn stop(&self) {
        {
            let _gate = self.gate.write();
            let previous = ManagerState::from_u8(
                self.state
                    .swap(ManagerState::Stopping.as_u8(), Ordering::SeqCst),
            );
            match previous {
                ManagerState::Running => {}
                ManagerState::Created => {
                    self.set_state(ManagerState::Stopped);
                    return;
                }
                ManagerState::Stopping | ManagerState::Stopped => {
                    self.set_state(previous);
                    return;
                }
            }
            // Every accepted task is now ahead of the sentinel.
            self.queue.wake();
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(manager = %self.name, "dispatch thread panicked");
            }
        }
        self.pool.shutdown(true);
        self.set_state(ManagerState::Stopped);
    }

    /// Queue a task without waiting for it.
    ///
    /// The returned handle can be awaited with [`Task::await_result`].
    pub fn enqueue<T>(
        &self,
        task: Task<T>,
    ) -> Result<Arc<Task<T>>, TaskError>
    where
        T: Send + 'static,
    {
        let _gate = self.gate.read();
        match self.state() {
            ManagerState::Running => {}
            ManagerState::Created => return Err(TaskError::NotStarted(self.name.clone())),
            ManagerState::Stopping | ManagerState::Stopped => {
                return Err(TaskError::ManagerStopped(self.name.clone()))
            }
        }

        let task = Arc::new(task);
        self.queue.push(task.clone());
        self.stats.record_submitted(self.queue.len());
        Ok(task)
    }

    /// Queue a task and block until it completes.
    ///
    /// Behaves like calling the task's callable directly, plus queueing and
    /// rate-limit latency. Async tasks yield their [`PoolFuture`].
    pub fn submit<T>(
        &self,
        task: Task<T>,
    ) -> Result<T, TaskError>
    where
        T: Clone + Send + 'static,
    {
        self.enqueue(task)?.await_result()
    }

    /// Wrap `callable` in a synchronous task and submit it.
    pub fn submit_fn<T, F>(
        &self,
        name: impl Into<String>,
        tag: Option<&str>,
        callable: F,
    ) -> Result<T, TaskError>
    where
        T: Clone + Send + 'static,
        F: FnMut() -> anyhow::Result<T> + Send + 'static,
    {
        let task = TaskBuilder::new()
            .name(name)
            .maybe_tag(tag)
            .build(callable);
        self.submit(task)
    }

    /// Wrap `callable` in an async task and submit it.
    ///
    /// Returns once the task has been handed to the pool.
    pub fn submit_async<T, F>(
        &self,
        name: impl Into<String>,
        tag: Option<&str>,
        callable: F,
    ) -> Result<PoolFuture<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let task = TaskBuilder::new()
            .name(name)
            .maybe_tag(tag)
            .build_async(callable);
        self.submit(task)
    }

    /// Manager name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn set_state(
        &self,
        state: ManagerState,
    ) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Check if the manager accepts submissions.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == ManagerState::Running
    }

    /// Configured rate limits.
    #[inline]
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// The execution pool used for async tasks.
    #[inline]
    pub fn pool(&self) -> &Arc<ExecutionPool> {
        &self.pool
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    /// Number of tasks waiting in the queue.
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("rate_limits", &self.rate_limits)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

/// State moved onto the dispatch thread.
struct Dispatcher {
    name: String,
    state: Arc<AtomicU8>,
    queue: WorkQueue,
    limiter: RateLimiter,
    pool: Arc<ExecutionPool>,
    hooks: Arc<dyn TaskHooks>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    fn is_running(&self) -> bool {
        ManagerState::from_u8(self.state.load(Ordering::SeqCst)) == ManagerState::Running
    }

    /// Dispatch thread main loop.
    fn run(mut self) {
        let span = info_span!("task_manager", name = %self.name);
        let _entered = span.enter();
        debug!("dispatch loop started");

        loop {
            let task = match self.queue.pop() {
                Some(Envelope::Task(task)) => task,
                Some(Envelope::Wake) if self.is_running() => {
                    trace!("spurious wakeup");
                    continue;
                }
                Some(Envelope::Wake) | None => break,
            };
            self.run_task(&*task);
        }

        // Only reachable if the queue was fed without going through `enqueue`.
        let abandoned = self.queue.drain();
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing tasks queued after stop");
            self.stats.record_abandoned(abandoned.len());
            for task in abandoned {
                task.abandon(TaskError::ManagerStopped(self.name.clone()));
            }
        }
        debug!("dispatch loop exited");
    }

    fn run_task(
        &mut self,
        task: &dyn Dispatchable,
    ) {
        let info = task.info();

        let waited = self.limiter.acquire(info.tag);
        if !waited.is_zero() {
            trace!(task = info.name, tag = ?info.tag, waited_ms = waited.as_millis() as u64, "rate limited");
            self.stats.record_rate_wait(waited);
        }

        self.hooks.pre_run(&info);
        let start = Instant::now();
        task.dispatch(&self.pool);
        let elapsed = start.elapsed();
        self.stats.record_dispatched(elapsed, &info, task.state());
        self.hooks.post_run(elapsed, &info);
    }
}

#[cfg(test)]
mod tests;
