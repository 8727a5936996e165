//! Draining batches of running pool futures.
//!
//! Used when a caller fires many jobs straight at an [`ExecutionPool`]
//! (parallel segment uploads, say) and wants to know which ones need a
//! second attempt without losing the ones that already succeeded.
//!
//! [`ExecutionPool`]: super::ExecutionPool

use crossbeam::channel;
use tracing::{debug, error};

use super::error::{is_transient, ApplicationFailure, CapturedError, TaskError};
use super::pool::PoolFuture;

/// Decides whether a resolved value is an application-level failure.
pub trait ResponseClassifier<T> {
    /// Return an error if `value` represents a failure.
    fn classify(
        &self,
        value: &T,
    ) -> anyhow::Result<()>;

    /// Whether a failure is worth retrying.
    ///
    /// Defaults to transient connection failures and [`ApplicationFailure`].
    fn is_retriable(
        &self,
        error: &anyhow::Error,
    ) -> bool {
        is_transient(error)
            || error
                .chain()
                .any(|cause| cause.is::<ApplicationFailure>())
    }
}

impl<T, F> ResponseClassifier<T> for F
where
    F: Fn(&T) -> anyhow::Result<()>,
{
    fn classify(
        &self,
        value: &T,
    ) -> anyhow::Result<()> {
        self(value)
    }
}

/// Classifier that treats every resolved value as a success.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<T> ResponseClassifier<T> for AcceptAll {
    fn classify(
        &self,
        _value: &T,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A future outcome set aside for another attempt.
#[derive(Debug, Clone)]
pub enum RetryCandidate<T> {
    /// The value resolved but the classifier flagged it.
    Flagged { value: T, error: CapturedError },
    /// The job itself failed with a retriable error.
    Errored(TaskError),
}

impl<T> RetryCandidate<T> {
    /// The flagged value, if there is one.
    #[inline]
    pub fn value(&self) -> Option<&T> {
        match self {
            RetryCandidate::Flagged { value, .. } => Some(value),
            RetryCandidate::Errored(_) => None,
        }
    }
}

/// Successful values and retry candidates, in completion order.
pub type BatchOutcome<T> = (Vec<T>, Vec<RetryCandidate<T>>);

/// Wait for every future, in completion order, and partition the outcomes.
///
/// Retriable failures go to the retry list unless `raise_on_error` is set,
/// in which case the first one is returned as an error. Any other failure
/// is returned immediately either way.
pub fn wait_for_futures<T, C>(
    futures: &[PoolFuture<T>],
    raise_on_error: bool,
    classifier: &C,
) -> Result<BatchOutcome<T>, TaskError>
where
    T: Clone,
    C: ResponseClassifier<T> + ?Sized,
{
    let (watcher, completed) = channel::unbounded();
    for (index, future) in futures.iter().enumerate() {
        future.watch(watcher.clone(), index);
    }
    drop(watcher);

    let mut results = Vec::with_capacity(futures.len());
    let mut retries = Vec::new();

    // Ends early only if a pending future is dropped without resolving.
    for index in completed.iter().take(futures.len()) {
        match futures[index].get() {
            Ok(value) => match classifier.classify(&value) {
                Ok(()) => results.push(value),
                Err(err) => {
                    let retriable = classifier.is_retriable(&err);
                    let captured = CapturedError::new(err, format!("batch[{}]", index));
                    if !retriable || raise_on_error {
                        error!(index, error = %captured, "exception processing async task");
                        return Err(TaskError::Failed(captured));
                    }
                    debug!(index, error = %captured, "exception processing async task");
                    retries.push(RetryCandidate::Flagged {
                        value,
                        error: captured,
                    });
                }
            },
            Err(err) => {
                let retriable = err
                    .captured()
                    .is_some_and(|captured| classifier.is_retriable(captured.error()));
                if !retriable || raise_on_error {
                    error!(index, error = %err, "exception processing async task");
                    return Err(err);
                }
                debug!(index, error = %err, "exception processing async task");
                retries.push(RetryCandidate::Errored(err));
            }
        }
    }

    Ok((results, retries))
}
