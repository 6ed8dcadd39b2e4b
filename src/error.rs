//! Error types for jobq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The queue or its worker has been closed and released.
    #[error("queue has been closed and released")]
    QueueShutdown,

    /// No worker backend was supplied at construction time.
    #[error("missing worker backend")]
    MissingWorker,

    /// The backing store is full.
    #[error("max capacity reached")]
    CapacityExceeded,

    /// Nothing to dequeue right now. Retryable; the dispatcher polls again
    /// later. Never surfaced from the submit path.
    #[error("no task in queue")]
    EmptyQueue,

    /// A job ran past its deadline, or past its remaining budget after a
    /// shutdown-induced cancellation.
    #[error("job deadline exceeded")]
    Timeout,

    /// Error returned by a task callable or payload handler.
    #[error("task error: {0}")]
    Task(String),

    /// A panic recovered from inside a task.
    #[error("task panicked: {0}")]
    Panic(String),

    /// Any other backend-reported fault.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
