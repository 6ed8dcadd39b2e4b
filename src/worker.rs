//! The pluggable backend contract.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// A queue backend: stores submitted messages and executes them one at a
/// time on behalf of the dispatcher.
///
/// Implementations decide where messages live (an in-memory buffer, an
/// external broker) and how a payload is turned into work. The dispatcher
/// only ever talks to this trait.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Push one message onto the backing store.
    ///
    /// Fails with [`Error::QueueShutdown`](crate::Error::QueueShutdown)
    /// once the worker has been shut down and with
    /// [`Error::CapacityExceeded`](crate::Error::CapacityExceeded) when the
    /// store is full.
    async fn enqueue(&self, msg: Message) -> Result<()>;

    /// Pop one message without blocking.
    ///
    /// [`Error::EmptyQueue`](crate::Error::EmptyQueue) means nothing is
    /// available right now; the dispatcher treats it as a retryable poll
    /// condition. After `shutdown`, implementations may keep draining
    /// whatever is still buffered.
    async fn dequeue(&self) -> Result<Message>;

    /// Execute one message, blocking the caller until it finishes, times
    /// out, or is cancelled by shutdown. Must tolerate being called from at
    /// least `worker_count` tasks concurrently.
    async fn run(&self, msg: Message) -> Result<()>;

    /// Stop the backend. The first call wins; later calls return
    /// [`Error::QueueShutdown`](crate::Error::QueueShutdown) and have no
    /// further effect.
    async fn shutdown(&self) -> Result<()>;

    /// Declared capacity of the backing store.
    fn capacity(&self) -> usize;

    /// Number of messages currently buffered.
    fn usage(&self) -> usize;

    /// Number of jobs this backend is executing right now.
    fn busy_workers(&self) -> u64;
}
