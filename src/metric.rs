//! Task accounting: lock-free counters shared between the queue, its
//! workers, and external readers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter sink consulted on every submit, dispatch, and settle.
///
/// The queue and the in-memory worker each own one by default; inject a
/// shared instance to aggregate across components or to export the numbers
/// elsewhere.
pub trait Metric: Send + Sync {
    fn inc_busy_worker(&self);
    fn dec_busy_worker(&self);
    /// Jobs executing right now.
    fn busy_workers(&self) -> u64;

    fn inc_submitted_task(&self);
    fn submitted_tasks(&self) -> u64;

    fn inc_success_task(&self);
    fn success_tasks(&self) -> u64;

    fn inc_failure_task(&self);
    fn failure_tasks(&self) -> u64;
}

/// Default [`Metric`] implementation over plain atomics.
///
/// `submitted`, `success`, and `failure` are monotonic; `busy_workers` is a
/// gauge whose increment always precedes the matching decrement.
#[derive(Debug, Default)]
pub struct Counters {
    busy_workers: AtomicU64,
    submitted_tasks: AtomicU64,
    success_tasks: AtomicU64,
    failure_tasks: AtomicU64,
}

impl Metric for Counters {
    fn inc_busy_worker(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_busy_worker(&self) {
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    fn busy_workers(&self) -> u64 {
        self.busy_workers.load(Ordering::Relaxed)
    }

    fn inc_submitted_task(&self) {
        self.submitted_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn submitted_tasks(&self) -> u64 {
        self.submitted_tasks.load(Ordering::Relaxed)
    }

    fn inc_success_task(&self) {
        self.success_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn success_tasks(&self) -> u64 {
        self.success_tasks.load(Ordering::Relaxed)
    }

    fn inc_failure_task(&self) {
        self.failure_tasks.fetch_add(1, Ordering::Relaxed);
    }

    fn failure_tasks(&self) -> u64 {
        self.failure_tasks.load(Ordering::Relaxed)
    }
}
