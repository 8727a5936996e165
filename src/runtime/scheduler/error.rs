//! Error types for task dispatch.
//!
//! Callables report failures as [`anyhow::Error`]. The dispatcher captures
//! them into a [`CapturedError`] on the thread that ran the task and hands a
//! clone of it back to every thread waiting on the result, so the original
//! error type stays reachable through [`CapturedError::downcast_ref`].

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use std::thread;

/// Transient lower-level connection failure (e.g. connection reset).
///
/// A synchronous task whose callable fails with this error anywhere in its
/// chain is retried once, immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection failure: {message}")]
pub struct ConnectionFailure {
    message: String,
}

impl ConnectionFailure {
    /// Create a new connection failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the failure message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Application-level failure carried by an otherwise successful response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HTTP {status}: {message}")]
pub struct ApplicationFailure {
    /// Response status code.
    pub status: u16,
    /// Response body or reason phrase.
    pub message: String,
}

impl ApplicationFailure {
    /// Create a new application failure.
    pub fn new(
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Check a status code, failing for anything outside `2xx`.
    pub fn check_status(
        status: u16,
        message: impl Into<String>,
    ) -> Result<(), Self> {
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(Self::new(status, message))
        }
    }
}

/// Whether an error (or any of its causes) is a [`ConnectionFailure`].
pub fn is_transient(error: &anyhow::Error) -> bool {
    error.downcast_ref::<ConnectionFailure>().is_some()
        || error
            .chain()
            .any(|cause| cause.is::<ConnectionFailure>())
}

/// A callable failure captured on the thread that executed it.
///
/// Cloning is cheap and every clone refers to the same underlying error.
#[derive(Clone)]
pub struct CapturedError {
    error: Arc<anyhow::Error>,
    task: String,
    thread: Option<String>,
}

impl CapturedError {
    /// Capture an error raised by `task` on the current thread.
    pub fn new(
        error: anyhow::Error,
        task: impl Into<String>,
    ) -> Self {
        Self {
            error: Arc::new(error),
            task: task.into(),
            thread: thread::current().name().map(str::to_owned),
        }
    }

    /// Name of the task that failed.
    #[inline]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Name of the thread the failure happened on, if it had one.
    #[inline]
    pub fn origin_thread(&self) -> Option<&str> {
        self.thread.as_deref()
    }

    /// The original error.
    #[inline]
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    /// Backtrace recorded where the original error was created.
    #[inline]
    pub fn backtrace(&self) -> &Backtrace {
        self.error.backtrace()
    }

    /// Downcast the original error to a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether the original error is of type `E`.
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.is::<E>()
    }

    /// Whether the original error is a transient connection failure.
    #[inline]
    pub fn is_transient(&self) -> bool {
        is_transient(&self.error)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CapturedError")
            .field("task", &self.task)
            .field("thread", &self.thread)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for CapturedError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        fmt::Display::fmt(&*self.error, f)
    }
}

impl std::error::Error for CapturedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let inner: &(dyn std::error::Error + Send + Sync + 'static) = (*self.error).as_ref();
        Some(inner)
    }
}

/// Errors surfaced by the task manager, its tasks and the execution pool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Submission to a manager that has been stopped.
    #[error("task manager '{0}' is stopped")]
    ManagerStopped(String),

    /// Submission to a manager that was never started.
    #[error("task manager '{0}' has not been started")]
    NotStarted(String),

    /// `start` called on a manager that already left the created state.
    #[error("task manager '{0}' is already started")]
    AlreadyStarted(String),

    /// The wrapped callable returned an error.
    #[error(transparent)]
    Failed(#[from] CapturedError),

    /// The wrapped callable panicked.
    #[error("task '{task}' panicked: {message}")]
    Panicked { task: String, message: String },

    /// Work submitted to a pool that has been shut down.
    #[error("execution pool '{0}' is shut down")]
    PoolShutdown(String),

    /// A task was completed a second time.
    #[error("task '{0}' already completed")]
    AlreadyCompleted(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl TaskError {
    /// The captured callable failure, if this is one.
    #[inline]
    pub fn captured(&self) -> Option<&CapturedError> {
        match self {
            TaskError::Failed(captured) => Some(captured),
            _ => None,
        }
    }

    /// Downcast a captured callable failure to its original type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.captured().and_then(CapturedError::downcast_ref::<E>)
    }

    /// Whether this is a captured transient connection failure.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.captured().is_some_and(CapturedError::is_transient)
    }
}
