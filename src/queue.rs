//! The pool dispatcher: accepts submissions, keeps at most `worker_count`
//! jobs running, and orchestrates graceful shutdown.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::group::RoutineGroup;
use crate::message::Message;
use crate::metric::{Counters, Metric};
use crate::worker::Worker;

/// Pause between dequeue polls while the backing store is empty.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A message queue dispatching to a bounded pool of concurrent runners.
///
/// Cloning is cheap and every clone drives the same pool.
///
/// ```no_run
/// use std::sync::Arc;
/// use jobq::{Consumer, Queue};
///
/// # async fn example() -> jobq::Result<()> {
/// let queue = Queue::builder()
///     .worker_count(4)
///     .worker(Arc::new(Consumer::builder().handler(|_token, payload| async move {
///         println!("got {} bytes", payload.len());
///         Ok(())
///     }).build()))
///     .build()?;
///
/// queue.start();
/// queue.submit_payload(b"hello".to_vec()).await?;
/// queue.release().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

struct Inner {
    worker: Arc<dyn Worker>,
    metric: Arc<dyn Metric>,
    group: RoutineGroup,
    quit: CancellationToken,
    /// Single-slot coalescing wakeup: any number of nudges collapse into
    /// one pending token.
    ready: Notify,
    /// Pairs the busy-vs-target check with the ready nudge so a slot
    /// opening between check and wait cannot be lost.
    schedule_gate: Mutex<()>,
    worker_count: AtomicUsize,
    stop_flag: AtomicBool,
}

impl Queue {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// Submit a message. Returns once the worker has accepted it; execution
    /// outcomes are reported through the counters and the log, never here.
    pub async fn submit(&self, msg: Message) -> Result<()> {
        if self.inner.stop_flag.load(Ordering::SeqCst) {
            return Err(Error::QueueShutdown);
        }

        self.inner.worker.enqueue(msg).await?;
        self.inner.metric.inc_submitted_task();

        Ok(())
    }

    /// Submit an opaque payload for the worker's registered handler.
    pub async fn submit_payload(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.submit(Message::payload(payload)).await
    }

    /// Submit a self-contained task.
    pub async fn submit_task<F, Fut>(&self, task: F) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.submit(Message::task(task)).await
    }

    /// Launch a dispatcher loop. A no-op when `worker_count` is zero or the
    /// queue is already stopped; calling it again adds another loop over
    /// the same pool.
    pub fn start(&self) {
        if self.inner.stop_flag.load(Ordering::SeqCst) {
            return;
        }
        if self.inner.worker_count.load(Ordering::SeqCst) == 0 {
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.group.spawn(inner.dispatch());
    }

    /// Initiate graceful shutdown: reject new submissions, stop the worker,
    /// and broadcast quit. Safe to call any number of times; only the first
    /// call has any effect.
    pub async fn shutdown(&self) {
        if self
            .inner
            .stop_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let busy = self.inner.metric.busy_workers();
        if busy > 0 {
            info!(busy_workers = busy, "shutting down with tasks in flight");
        }

        if let Err(err) = self.inner.worker.shutdown().await {
            error!(%err, "worker shutdown failed");
        }

        self.inner.quit.cancel();
    }

    /// Shutdown followed by [`Queue::wait`].
    pub async fn release(&self) {
        self.shutdown().await;
        self.wait().await;
    }

    /// Block until every spawned dispatcher, fetch, and runner task has
    /// finished.
    pub async fn wait(&self) {
        self.inner.group.wait().await;
    }

    /// Replace the target concurrency and kick the scheduler so newly
    /// opened slots fill promptly. Lowering the target never preempts
    /// in-flight work; excess runners drain as they finish.
    pub fn update_worker_count(&self, count: usize) {
        self.inner.worker_count.store(count, Ordering::SeqCst);
        self.inner.schedule();
    }

    pub fn busy_workers(&self) -> u64 {
        self.inner.metric.busy_workers()
    }

    pub fn submitted_tasks(&self) -> u64 {
        self.inner.metric.submitted_tasks()
    }

    pub fn success_tasks(&self) -> u64 {
        self.inner.metric.success_tasks()
    }

    pub fn failure_tasks(&self) -> u64 {
        self.inner.metric.failure_tasks()
    }

    /// Declared capacity of the worker's backing store.
    pub fn capacity(&self) -> usize {
        self.inner.worker.capacity()
    }

    /// Messages currently buffered in the worker.
    pub fn usage(&self) -> usize {
        self.inner.worker.usage()
    }
}

impl Inner {
    /// Nudge the dispatcher if a slot is open. The gate keeps the check and
    /// the notify atomic with respect to concurrent schedulers.
    fn schedule(&self) {
        let _gate = self.schedule_gate.lock();
        if self.metric.busy_workers() < self.worker_count.load(Ordering::SeqCst) as u64 {
            self.ready.notify_one();
        }
    }

    /// Dispatcher loop: admit, wait for a slot or quit, fetch one message,
    /// hand it to a runner.
    async fn dispatch(self: Arc<Self>) {
        loop {
            self.schedule();

            tokio::select! {
                _ = self.ready.notified() => {}
                _ = self.quit.cancelled() => return,
            }

            let (tx, rx) = oneshot::channel();
            let fetcher = Arc::clone(&self);
            self.group.spawn(fetcher.fetch(tx));

            // The fetch unit delivers exactly one message or drops the
            // sender once shutdown wins; a closed channel ends this loop.
            // A message arriving after quit is still dispatched so fetched
            // work is never dropped on the floor.
            let msg = match rx.await {
                Ok(msg) => msg,
                Err(_) => return,
            };

            self.metric.inc_busy_worker();
            let runner = Arc::clone(&self);
            self.group.spawn(runner.work(msg));
        }
    }

    /// Poll the worker until a message is available, then hand it off.
    async fn fetch(self: Arc<Self>, handoff: oneshot::Sender<Message>) {
        loop {
            match self.worker.dequeue().await {
                Ok(msg) => {
                    let _ = handoff.send(msg);
                    return;
                }
                Err(Error::EmptyQueue) => {
                    // Drained: after quit there is nothing left to wait for.
                    if self.quit.is_cancelled() {
                        return;
                    }
                    tokio::select! {
                        // Loop once more for a final drain poll.
                        _ = self.quit.cancelled() => {}
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
                Err(err) => {
                    if self.quit.is_cancelled() {
                        return;
                    }
                    error!(%err, "dequeue failed");
                    tokio::select! {
                        _ = self.quit.cancelled() => return,
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }

    /// Run one message to settlement and account for it.
    async fn work(self: Arc<Self>, msg: Message) {
        // Releases the slot, reopens scheduling, and settles the counters
        // on every exit path, a panicking backend included.
        let mut slot = SlotGuard {
            inner: &self,
            success: false,
        };

        match self.worker.run(msg).await {
            Ok(()) => slot.success = true,
            Err(err) => error!(%err, "task failed"),
        }
    }
}

struct SlotGuard<'a> {
    inner: &'a Inner,
    success: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.inner.metric.dec_busy_worker();
        self.inner.schedule();
        if self.success {
            self.inner.metric.inc_success_task();
        } else {
            self.inner.metric.inc_failure_task();
        }
    }
}

/// Builder for [`Queue`].
pub struct QueueBuilder {
    worker_count: usize,
    worker: Option<Arc<dyn Worker>>,
    metric: Option<Arc<dyn Metric>>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            worker_count: 1,
            worker: None,
            metric: None,
        }
    }

    /// Target concurrency ceiling. Defaults to 1.
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// The backend instance. Required.
    pub fn worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Counter sink. Defaults to a private [`Counters`].
    pub fn metric(mut self, metric: Arc<dyn Metric>) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn build(self) -> Result<Queue> {
        let worker = self.worker.ok_or(Error::MissingWorker)?;

        Ok(Queue {
            inner: Arc::new(Inner {
                worker,
                metric: self
                    .metric
                    .unwrap_or_else(|| Arc::new(Counters::default())),
                group: RoutineGroup::default(),
                quit: CancellationToken::new(),
                ready: Notify::new(),
                schedule_gate: Mutex::new(()),
                worker_count: AtomicUsize::new(self.worker_count),
                stop_flag: AtomicBool::new(false),
            }),
        })
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}
