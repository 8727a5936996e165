//! Task definitions for the task manager.
//!
//! A [`Task`] wraps a callable together with its bound arguments, a display
//! name and an optional rate-limit tag. The caller keeps a handle to the task
//! while the dispatcher runs it, and reads the outcome back through
//! [`Task::await_result`] once the completion signal fires.

use std::any::{type_name, Any};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use super::error::{CapturedError, TaskError};
use super::pool::{ExecutionPool, PoolFuture};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl From<TaskId> for usize {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Thread-safe generator for task IDs.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
        }
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static TASK_IDS: TaskIdGenerator = TaskIdGenerator::new();

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is waiting in the queue.
    Queued,
    /// Task is currently executing.
    Running,
    /// Task has completed successfully.
    Finished,
    /// Task has failed.
    Failed,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => TaskState::Running,
            2 => TaskState::Finished,
            3 => TaskState::Failed,
            _ => TaskState::Queued,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Queued => 0,
            TaskState::Running => 1,
            TaskState::Finished => 2,
            TaskState::Failed => 3,
        }
    }

    /// Whether the task reached a terminal state.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

struct Slot<T> {
    outcome: Option<Result<T, TaskError>>,
    watchers: Vec<(Sender<usize>, usize)>,
}

/// Write-once outcome slot with a completion signal.
///
/// Shared by [`Task`] and [`PoolFuture`]. The outcome is set at most once;
/// any number of threads may block on it.
pub struct Completion<T> {
    slot: Mutex<Slot<T>>,
    signal: Condvar,
}

impl<T> Completion<T> {
    /// Create an unset completion.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                outcome: None,
                watchers: Vec::new(),
            }),
            signal: Condvar::new(),
        }
    }

    /// Store the outcome and release waiters.
    ///
    /// Returns `false` (leaving the first outcome in place) if already set.
    pub fn set(
        &self,
        outcome: Result<T, TaskError>,
    ) -> bool {
        self.set_then(outcome, || {})
    }

    /// Like [`Completion::set`], running `on_win` under the slot lock when
    /// this call is the one that stores the outcome.
    pub(crate) fn set_then(
        &self,
        outcome: Result<T, TaskError>,
        on_win: impl FnOnce(),
    ) -> bool {
        let watchers = {
            let mut slot = self.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            on_win();
            slot.outcome = Some(outcome);
            std::mem::take(&mut slot.watchers)
        };
        self.signal.notify_all();
        for (watcher, index) in watchers {
            // The receiving side may have given up already.
            let _ = watcher.send(index);
        }
        true
    }

    /// Whether the outcome has been set.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.slot.lock().outcome.is_some()
    }

    /// Send `index` on `watcher` once the outcome is set.
    pub(crate) fn watch(
        &self,
        watcher: Sender<usize>,
        index: usize,
    ) {
        let mut slot = self.slot.lock();
        if slot.outcome.is_some() {
            drop(slot);
            let _ = watcher.send(index);
        } else {
            slot.watchers.push((watcher, index));
        }
    }
}

impl<T: Clone> Completion<T> {
    /// Block until the outcome is set and return a copy of it.
    pub fn wait(&self) -> Result<T, TaskError> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            self.signal.wait(&mut slot);
        }
    }

    /// Like [`Completion::wait`], giving up after `timeout`.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<T, TaskError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return Some(outcome.clone());
            }
            if self.signal.wait_until(&mut slot, deadline).timed_out() {
                return slot.outcome.clone();
            }
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Completion")
            .field("set", &self.is_set())
            .finish()
    }
}

type InlineJob<T> = Box<dyn FnMut() -> anyhow::Result<T> + Send>;
type PooledJob<T> = Box<dyn FnOnce(&ExecutionPool, &str) -> T + Send>;

enum Payload<T> {
    /// Runs on the dispatch thread, with one retry on transient failure.
    Inline(InlineJob<T>),
    /// Handed to the execution pool; the task completes with the future.
    Pooled(PooledJob<T>),
}

/// Borrowed view of a task passed to dispatch hooks.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo<'a> {
    /// Task ID.
    pub id: TaskId,
    /// Display name.
    pub name: &'a str,
    /// Rate-limit tag.
    pub tag: Option<&'a str>,
    /// Whether the task runs on the execution pool.
    pub is_async: bool,
}

/// A unit of work submitted to a [`TaskManager`](super::TaskManager).
pub struct Task<T> {
    id: TaskId,
    name: String,
    tag: Option<String>,
    is_async: bool,
    state: AtomicU8,
    payload: Mutex<Option<Payload<T>>>,
    completion: Completion<T>,
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("is_async", &self.is_async)
            .field("state", &self.state())
            .finish()
    }
}

fn default_name<T>() -> String {
    let full = type_name::<T>();
    let short = full
        .split('<')
        .next()
        .and_then(|path| path.rsplit("::").next())
        .unwrap_or(full);
    format!("Task<{}>", short)
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Call `job` once, turning errors and panics into a [`TaskError`].
pub(crate) fn call_guarded<T>(
    name: &str,
    job: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(TaskError::Failed(CapturedError::new(error, name))),
        Err(payload) => Err(TaskError::Panicked {
            task: name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

impl<T: Send + 'static> Task<T> {
    /// Create a synchronous task around `callable`.
    ///
    /// The callable is `FnMut` so it can be invoked a second time when the
    /// first attempt fails with a transient connection failure.
    pub fn new<F>(callable: F) -> Self
    where
        F: FnMut() -> anyhow::Result<T> + Send + 'static,
    {
        Self::from_payload(default_name::<T>(), None, false, Payload::Inline(Box::new(callable)))
    }

    fn from_payload(
        name: String,
        tag: Option<String>,
        is_async: bool,
        payload: Payload<T>,
    ) -> Self {
        Self {
            id: TASK_IDS.next(),
            name,
            tag,
            is_async,
            state: AtomicU8::new(TaskState::Queued.as_u8()),
            payload: Mutex::new(Some(payload)),
            completion: Completion::new(),
        }
    }

    /// Set the display name.
    #[inline]
    pub fn with_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = name.into();
        self
    }

    /// Set the rate-limit tag.
    #[inline]
    pub fn with_tag(
        mut self,
        tag: impl Into<String>,
    ) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Run a synchronous task on the current thread and record its outcome.
    ///
    /// A transient connection failure is retried once, immediately. A second
    /// failure of any kind is the one recorded. Async tasks are left
    /// untouched; they only run through [`Task::dispatch`].
    pub fn execute(&self) {
        let job = {
            let mut payload = self.payload.lock();
            match payload.take() {
                Some(Payload::Inline(job)) => job,
                other => {
                    *payload = other;
                    warn!(task = %self.name, "execute called on a task without an inline job");
                    return;
                }
            }
        };
        self.run_inline(job);
    }

    /// Run the task the way the dispatcher does: inline for synchronous
    /// tasks, on `pool` for async ones.
    pub fn dispatch(
        &self,
        pool: &ExecutionPool,
    ) {
        let payload = self.payload.lock().take();
        match payload {
            Some(Payload::Inline(job)) => self.run_inline(job),
            Some(Payload::Pooled(job)) => {
                self.set_state(TaskState::Running);
                let future = job(pool, &self.name);
                let _ = self.complete(future);
            }
            None => warn!(task = %self.name, "task dispatched more than once"),
        }
    }

    fn run_inline(
        &self,
        mut job: InlineJob<T>,
    ) {
        self.set_state(TaskState::Running);
        let outcome = match call_guarded(&self.name, &mut job) {
            Err(error) if error.is_transient() => {
                warn!(task = %self.name, error = %error, "transient connection failure, retrying once");
                call_guarded(&self.name, &mut job)
            }
            outcome => outcome,
        };
        let _ = match outcome {
            Ok(value) => self.complete(value),
            Err(error) => self.fail(error),
        };
    }

    /// Record a successful outcome.
    pub fn complete(
        &self,
        value: T,
    ) -> Result<(), TaskError> {
        self.finish(Ok(value), TaskState::Finished)
    }

    /// Record a failed outcome.
    pub fn fail(
        &self,
        error: TaskError,
    ) -> Result<(), TaskError> {
        self.finish(Err(error), TaskState::Failed)
    }

    fn finish(
        &self,
        outcome: Result<T, TaskError>,
        state: TaskState,
    ) -> Result<(), TaskError> {
        // Only the winner stores its state, before any waiter is released.
        if self.completion.set_then(outcome, || self.set_state(state)) {
            Ok(())
        } else {
            Err(TaskError::AlreadyCompleted(self.name.clone()))
        }
    }
}

impl<U: Send + 'static> Task<PoolFuture<U>> {
    /// Create an async task around `callable`.
    ///
    /// The dispatcher hands the callable to its execution pool as is (no
    /// transient-failure retry) and completes the task with the pool's
    /// future.
    pub fn new_async<F>(callable: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<U> + Send + 'static,
    {
        let job: PooledJob<PoolFuture<U>> =
            Box::new(move |pool: &ExecutionPool, name: &str| pool.submit_named(name, callable));
        Self::from_payload(default_name::<U>(), None, true, Payload::Pooled(job))
    }
}

impl<T> Task<T> {
    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the rate-limit tag.
    #[inline]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Whether the task runs on the execution pool.
    #[inline]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[inline]
    fn set_state(
        &self,
        state: TaskState,
    ) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Whether the completion signal has fired.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.completion.is_set()
    }

    /// Borrowed view for hooks.
    #[inline]
    pub fn info(&self) -> TaskInfo<'_> {
        TaskInfo {
            id: self.id,
            name: &self.name,
            tag: self.tag.as_deref(),
            is_async: self.is_async,
        }
    }
}

impl<T: Clone> Task<T> {
    /// Block until the task completes, then return its value or error.
    ///
    /// Every call, from any thread, observes the same outcome.
    pub fn await_result(&self) -> Result<T, TaskError> {
        self.completion.wait()
    }

    /// Like [`Task::await_result`], returning `None` on timeout.
    pub fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<T, TaskError>> {
        self.completion.wait_timeout(timeout)
    }
}

/// Type-erased task as seen by the dispatch loop.
pub(crate) trait Dispatchable: Send + Sync {
    fn info(&self) -> TaskInfo<'_>;

    fn state(&self) -> TaskState;

    fn dispatch(
        &self,
        pool: &ExecutionPool,
    );

    /// Fail a task that will never be dispatched.
    fn abandon(
        &self,
        error: TaskError,
    );
}

impl<T: Send + 'static> Dispatchable for Task<T> {
    fn info(&self) -> TaskInfo<'_> {
        Task::info(self)
    }

    fn state(&self) -> TaskState {
        Task::state(self)
    }

    fn dispatch(
        &self,
        pool: &ExecutionPool,
    ) {
        Task::dispatch(self, pool)
    }

    fn abandon(
        &self,
        error: TaskError,
    ) {
        self.payload.lock().take();
        let _ = self.fail(error);
    }
}

/// Task builder for constructing tasks with various options.
#[derive(Debug, Default)]
pub struct TaskBuilder {
    name: Option<String>,
    tag: Option<String>,
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the rate-limit tag.
    #[inline]
    pub fn tag(
        mut self,
        tag: impl Into<String>,
    ) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set or clear the rate-limit tag.
    #[inline]
    pub fn maybe_tag(
        mut self,
        tag: Option<&str>,
    ) -> Self {
        self.tag = tag.map(str::to_owned);
        self
    }

    /// Build a synchronous task.
    pub fn build<T, F>(
        self,
        callable: F,
    ) -> Task<T>
    where
        T: Send + 'static,
        F: FnMut() -> anyhow::Result<T> + Send + 'static,
    {
        self.apply(Task::new(callable))
    }

    /// Build an async task.
    pub fn build_async<U, F>(
        self,
        callable: F,
    ) -> Task<PoolFuture<U>>
    where
        U: Send + 'static,
        F: FnOnce() -> anyhow::Result<U> + Send + 'static,
    {
        self.apply(Task::new_async(callable))
    }

    fn apply<T: Send + 'static>(
        self,
        mut task: Task<T>,
    ) -> Task<T> {
        if let Some(name) = self.name {
            task.name = name;
        }
        task.tag = self.tag;
        task
    }
}
