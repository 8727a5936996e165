//! Bounded thread pool for async tasks and batch work.
//!
//! Worker threads are spawned on the first submission and live until the
//! pool is shut down. Jobs wait in an unbounded channel; at most
//! `max_workers` of them run at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::TaskError;
use super::task::{call_guarded, Completion};

/// Default number of pool workers.
pub const DEFAULT_MAX_WORKERS: usize = 5;

type Job = Box<dyn FnOnce() + Send>;

struct Workers {
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Handle to the eventual outcome of a pool job.
pub struct PoolFuture<T> {
    completion: Arc<Completion<T>>,
}

impl<T> PoolFuture<T> {
    fn pending() -> Self {
        Self {
            completion: Arc::new(Completion::new()),
        }
    }

    /// A future that is already resolved.
    pub fn resolved(outcome: Result<T, TaskError>) -> Self {
        let future = Self::pending();
        future.completion.set(outcome);
        future
    }

    /// Whether the job has finished.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.completion.is_set()
    }

    pub(crate) fn watch(
        &self,
        watcher: Sender<usize>,
        index: usize,
    ) {
        self.completion.watch(watcher, index);
    }
}

impl<T: Clone> PoolFuture<T> {
    /// Block until the job finishes and return its value or error.
    pub fn get(&self) -> Result<T, TaskError> {
        self.completion.wait()
    }

    /// Like [`PoolFuture::get`], returning `None` on timeout.
    pub fn get_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<T, TaskError>> {
        self.completion.wait_timeout(timeout)
    }
}

impl<T> Clone for PoolFuture<T> {
    fn clone(&self) -> Self {
        Self {
            completion: self.completion.clone(),
        }
    }
}

impl<T> fmt::Debug for PoolFuture<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("PoolFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Fixed-size, lazily started thread pool.
pub struct ExecutionPool {
    name: String,
    max_workers: usize,
    accepting: AtomicBool,
    workers: OnceCell<Workers>,
}

impl ExecutionPool {
    /// Create a pool with `max_workers` threads (at least one).
    pub fn new(
        name: impl Into<String>,
        max_workers: usize,
    ) -> Self {
        Self {
            name: name.into(),
            max_workers: max_workers.max(1),
            accepting: AtomicBool::new(true),
            workers: OnceCell::new(),
        }
    }

    /// Pool name, used for worker thread names.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of concurrently running jobs.
    #[inline]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Whether the worker threads have been spawned.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.workers.get().is_some()
    }

    /// Whether the pool still accepts work.
    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Submit a job, returning a handle to its outcome.
    pub fn submit<T, F>(
        &self,
        job: F,
    ) -> PoolFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let name = format!("{}-job", self.name);
        self.submit_named(&name, job)
    }

    /// Submit a job whose failures are attributed to `name`.
    pub fn submit_named<T, F>(
        &self,
        name: &str,
        job: F,
    ) -> PoolFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let future = PoolFuture::pending();
        if !self.is_accepting() {
            future.completion.set(Err(TaskError::PoolShutdown(self.name.clone())));
            return future;
        }

        let workers = match self.workers.get_or_try_init(|| self.spawn_workers()) {
            Ok(workers) => workers,
            Err(err) => {
                future.completion.set(Err(err));
                return future;
            }
        };

        let completion = future.completion.clone();
        let task = name.to_string();
        let run: Job = Box::new(move || {
            completion.set(call_guarded(&task, job));
        });

        let sent = match workers.sender.lock().as_ref() {
            Some(sender) => sender.send(run).is_ok(),
            None => false,
        };
        if !sent {
            future.completion.set(Err(TaskError::PoolShutdown(self.name.clone())));
        }
        future
    }

    fn spawn_workers(&self) -> Result<Workers, TaskError> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(self.max_workers);

        for worker_id in 0..self.max_workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-pool-{}", self.name, worker_id))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .map_err(|err| TaskError::Spawn(err.to_string()))?;
            handles.push(handle);
        }

        debug!(pool = %self.name, workers = self.max_workers, "execution pool started");
        Ok(Workers {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
        })
    }

    /// Stop accepting work.
    ///
    /// Already queued jobs still run. With `wait`, blocks until every worker
    /// has drained the queue and exited.
    pub fn shutdown(
        &self,
        wait: bool,
    ) {
        self.accepting.store(false, Ordering::SeqCst);
        let Some(workers) = self.workers.get() else {
            return;
        };
        workers.sender.lock().take();
        if wait {
            let handles: Vec<_> = workers.handles.lock().drain(..).collect();
            for handle in handles {
                if handle.join().is_err() {
                    warn!(pool = %self.name, "pool worker panicked");
                }
            }
            debug!(pool = %self.name, "execution pool stopped");
        }
    }
}

impl fmt::Debug for ExecutionPool {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("name", &self.name)
            .field("max_workers", &self.max_workers)
            .field("started", &self.is_started())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl Default for ExecutionPool {
    fn default() -> Self {
        Self::new("cloudtask", DEFAULT_MAX_WORKERS)
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}
