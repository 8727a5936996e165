//! Work queue for the dispatcher
//!
//! Multi-producer FIFO of type-erased tasks, drained by the single dispatch
//! thread. The queue is unbounded.

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use super::task::Dispatchable;

/// Queue entry.
pub(crate) enum Envelope {
    /// A task to dispatch.
    Task(Arc<dyn Dispatchable>),
    /// Wakes the dispatch thread so it can notice a state change.
    Wake,
}

/// A thread-safe task queue supporting multiple producers.
#[derive(Clone)]
pub(crate) struct WorkQueue {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
}

impl WorkQueue {
    /// Create a new empty queue.
    #[inline]
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver }
    }

    /// Push a task to the back of the queue.
    #[inline]
    pub fn push(
        &self,
        task: Arc<dyn Dispatchable>,
    ) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(Envelope::Task(task));
    }

    /// Push a wake-up sentinel.
    #[inline]
    pub fn wake(&self) {
        let _ = self.sender.send(Envelope::Wake);
    }

    /// Block until the next entry is available.
    #[inline]
    pub fn pop(&self) -> Option<Envelope> {
        self.receiver.recv().ok()
    }

    /// Remove every task still queued, discarding sentinels.
    pub fn drain(&self) -> Vec<Arc<dyn Dispatchable>> {
        let mut tasks = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(Envelope::Task(task)) => tasks.push(task),
                Ok(Envelope::Wake) => continue,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        tasks
    }

    /// Get the number of queued entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
