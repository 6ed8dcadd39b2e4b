//! # jobq
//!
//! In-process job queue with a dynamically sized worker pool.
//!
//! Producers submit byte payloads or self-contained async tasks; a
//! dispatcher drains them through a pluggable [`Worker`] backend under a
//! runtime-adjustable concurrency ceiling, with per-job timeouts, panic
//! recovery, and graceful shutdown.

pub mod consumer;
pub mod error;
mod group;
pub mod message;
pub mod metric;
pub mod queue;
pub mod worker;

pub use consumer::{Consumer, ConsumerBuilder, DEFAULT_QUEUE_SIZE};
pub use error::{Error, Result};
pub use message::{Message, TaskFn, TaskFuture, Work};
pub use metric::{Counters, Metric};
pub use queue::{Queue, QueueBuilder};
pub use worker::Worker;
