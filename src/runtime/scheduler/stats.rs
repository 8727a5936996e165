//! Dispatch statistics and hooks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::task::{TaskInfo, TaskState};

/// Callbacks invoked by the dispatch thread around every task.
///
/// Both default to no-ops. Implementations must be cheap; they run on the
/// dispatch thread and delay every task behind them.
pub trait TaskHooks: Send + Sync {
    /// Called right before a task runs.
    fn pre_run(
        &self,
        _task: &TaskInfo<'_>,
    ) {
    }

    /// Called after a task ran (or was handed to the pool).
    fn post_run(
        &self,
        _elapsed: Duration,
        _task: &TaskInfo<'_>,
    ) {
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl TaskHooks for NoHooks {}

/// Hooks that log every dispatch at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl TaskHooks for TracingHooks {
    fn pre_run(
        &self,
        task: &TaskInfo<'_>,
    ) {
        debug!(id = task.id.inner(), task = task.name, tag = ?task.tag, "manager submitting task");
    }

    fn post_run(
        &self,
        elapsed: Duration,
        task: &TaskInfo<'_>,
    ) {
        debug!(
            id = task.id.inner(),
            task = task.name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "manager ran task"
        );
    }
}

/// Dispatcher statistics.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Total tasks accepted by `submit`/`enqueue`.
    pub tasks_submitted: AtomicUsize,
    /// Total tasks taken off the queue and run.
    pub tasks_dispatched: AtomicUsize,
    /// Dispatched tasks that were handed to the pool.
    pub tasks_async: AtomicUsize,
    /// Dispatched tasks whose outcome was an error.
    pub tasks_failed: AtomicUsize,
    /// Tasks failed without running because the manager stopped.
    pub tasks_abandoned: AtomicUsize,
    /// Dispatches that had to sleep for a rate limit.
    pub rate_limited: AtomicUsize,
    /// Total rate-limit sleep in microseconds.
    pub rate_limit_wait_us: AtomicUsize,
    /// Total execution time in microseconds.
    pub total_exec_time_us: AtomicUsize,
    /// Peak queue depth seen at submission.
    pub peak_queue_depth: AtomicUsize,
}

impl DispatchStats {
    /// Record a submission with the queue depth it produced.
    #[inline]
    pub fn record_submitted(
        &self,
        queue_depth: usize,
    ) {
        self.tasks_submitted.fetch_add(1, Ordering::SeqCst);
        self.update_peak_depth(queue_depth);
    }

    /// Record a finished dispatch.
    #[inline]
    pub fn record_dispatched(
        &self,
        elapsed: Duration,
        task: &TaskInfo<'_>,
        state: TaskState,
    ) {
        self.tasks_dispatched.fetch_add(1, Ordering::SeqCst);
        self.total_exec_time_us
            .fetch_add(elapsed.as_micros() as usize, Ordering::SeqCst);
        if task.is_async {
            self.tasks_async.fetch_add(1, Ordering::SeqCst);
        }
        if state == TaskState::Failed {
            self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record a rate-limit sleep.
    #[inline]
    pub fn record_rate_wait(
        &self,
        waited: Duration,
    ) {
        self.rate_limited.fetch_add(1, Ordering::SeqCst);
        self.rate_limit_wait_us
            .fetch_add(waited.as_micros() as usize, Ordering::SeqCst);
    }

    /// Record tasks abandoned at shutdown.
    #[inline]
    pub fn record_abandoned(
        &self,
        count: usize,
    ) {
        self.tasks_abandoned.fetch_add(count, Ordering::SeqCst);
    }

    /// Update peak queue depth.
    #[inline]
    pub fn update_peak_depth(
        &self,
        current: usize,
    ) {
        loop {
            let peak = self.peak_queue_depth.load(Ordering::SeqCst);
            if current <= peak {
                break;
            }
            if self
                .peak_queue_depth
                .compare_exchange(peak, current, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::SeqCst),
            tasks_dispatched: self.tasks_dispatched.load(Ordering::SeqCst),
            tasks_async: self.tasks_async.load(Ordering::SeqCst),
            tasks_failed: self.tasks_failed.load(Ordering::SeqCst),
            tasks_abandoned: self.tasks_abandoned.load(Ordering::SeqCst),
            rate_limited: self.rate_limited.load(Ordering::SeqCst),
            rate_limit_wait_us: self.rate_limit_wait_us.load(Ordering::SeqCst),
            total_exec_time_us: self.total_exec_time_us.load(Ordering::SeqCst),
            peak_queue_depth: self.peak_queue_depth.load(Ordering::SeqCst),
        }
    }
}

/// Serializable copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub tasks_submitted: usize,
    pub tasks_dispatched: usize,
    pub tasks_async: usize,
    pub tasks_failed: usize,
    pub tasks_abandoned: usize,
    pub rate_limited: usize,
    pub rate_limit_wait_us: usize,
    pub total_exec_time_us: usize,
    pub peak_queue_depth: usize,
}
