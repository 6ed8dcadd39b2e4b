//! Default in-memory [`Worker`] over a bounded buffer.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TrySendError, TryRecvError};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::message::{Message, TaskFuture, Work};
use crate::metric::{Counters, Metric};
use crate::worker::Worker;

/// Default buffer size for the in-memory queue.
pub const DEFAULT_QUEUE_SIZE: usize = 4096;

/// Handler invoked for payload messages. Receives the job's cancellation
/// token and the raw payload bytes.
pub type PayloadFn = Arc<dyn Fn(CancellationToken, Vec<u8>) -> TaskFuture + Send + Sync>;

/// In-memory worker backed by a bounded FIFO channel.
///
/// Enqueue and dequeue are non-blocking. Execution supervises each job with
/// a per-job cancellation scope, a deadline, and panic capture, per the
/// protocol described on [`Worker::run`].
pub struct Consumer {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
    run_fn: PayloadFn,
    stop: CancellationToken,
    stop_flag: AtomicBool,
    default_timeout: Option<Duration>,
    metric: Arc<dyn Metric>,
}

impl Consumer {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ConsumerBuilder {
        ConsumerBuilder::new()
    }

    /// Supervise one job to settlement.
    ///
    /// The user work runs on its own task so a panic is caught at the task
    /// boundary instead of unwinding the supervisor. The supervisor races
    /// completion against the deadline and the stop signal; on stop it
    /// cancels the job's token and waits out the remaining deadline budget
    /// before declaring a timeout.
    async fn handle(&self, msg: Message) -> Result<()> {
        let token = CancellationToken::new();
        let started = Instant::now();
        let deadline = if msg.timeout.is_zero() {
            self.default_timeout
        } else {
            Some(msg.timeout)
        };

        let work: TaskFuture = match msg.into_work() {
            Work::Task(task) => task(token.clone()),
            Work::Payload(payload) => (self.run_fn)(token.clone(), payload),
        };

        // Count the job busy before it can start running so the gauge never
        // lags a job already executing on another runtime thread.
        self.metric.inc_busy_worker();
        let mut job = tokio::spawn(work);
        // Cancels the job scope and releases the busy gauge on every exit
        // path out of this function.
        let _guard = HandleGuard {
            metric: &*self.metric,
            token: token.clone(),
        };

        let deadline_sleep = async {
            match deadline {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_sleep);

        tokio::select! {
            res = &mut job => settle(res),
            _ = &mut deadline_sleep => Err(Error::Timeout),
            _ = self.stop.cancelled() => {
                token.cancel();
                match deadline {
                    Some(t) => {
                        let left = t.saturating_sub(started.elapsed());
                        match tokio::time::timeout(left, &mut job).await {
                            Ok(res) => settle(res),
                            Err(_) => Err(Error::Timeout),
                        }
                    }
                    None => settle((&mut job).await),
                }
            }
        }
    }
}

impl Default for Consumer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for Consumer {
    async fn enqueue(&self, msg: Message) -> Result<()> {
        // Gate on the stop flag before touching the buffer; the channel
        // itself is never closed while producers hold a handle.
        if self.stop_flag.load(Ordering::SeqCst) {
            return Err(Error::QueueShutdown);
        }

        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::CapacityExceeded),
            Err(TrySendError::Closed(_)) => Err(Error::QueueShutdown),
        }
    }

    async fn dequeue(&self) -> Result<Message> {
        match self.rx.lock().try_recv() {
            Ok(msg) => Ok(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Err(Error::EmptyQueue),
        }
    }

    async fn run(&self, msg: Message) -> Result<()> {
        if self.stop_flag.load(Ordering::SeqCst) {
            return Err(Error::QueueShutdown);
        }
        self.handle(msg).await
    }

    async fn shutdown(&self) -> Result<()> {
        if self
            .stop_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::QueueShutdown);
        }
        self.stop.cancel();
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    fn usage(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn busy_workers(&self) -> u64 {
        self.metric.busy_workers()
    }
}

struct HandleGuard<'a> {
    metric: &'a dyn Metric,
    token: CancellationToken,
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.metric.dec_busy_worker();
    }
}

fn settle(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match res {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(Error::Panic(panic_text(err.into_panic()))),
        Err(err) => Err(Error::Backend(err.to_string())),
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for [`Consumer`].
pub struct ConsumerBuilder {
    queue_size: usize,
    run_fn: PayloadFn,
    default_timeout: Option<Duration>,
    metric: Option<Arc<dyn Metric>>,
}

impl ConsumerBuilder {
    pub fn new() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            run_fn: Arc::new(|_token, _payload| -> TaskFuture { Box::pin(async { Ok(()) }) }),
            default_timeout: None,
            metric: None,
        }
    }

    /// Capacity of the in-memory buffer.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Handler invoked for payload messages. Defaults to a no-op.
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CancellationToken, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.run_fn = Arc::new(move |token, payload| -> TaskFuture {
            Box::pin(handler(token, payload))
        });
        self
    }

    /// Deadline applied to jobs whose message leaves the timeout unset.
    /// Defaults to no deadline beyond cancellation.
    pub fn default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = Some(default_timeout);
        self
    }

    /// Counter sink. Defaults to a private [`Counters`].
    pub fn metric(mut self, metric: Arc<dyn Metric>) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn build(self) -> Consumer {
        // tokio channels reject a zero bound
        let (tx, rx) = mpsc::channel(self.queue_size.max(1));
        Consumer {
            tx,
            rx: Mutex::new(rx),
            run_fn: self.run_fn,
            stop: CancellationToken::new(),
            stop_flag: AtomicBool::new(false),
            default_timeout: self.default_timeout,
            metric: self
                .metric
                .unwrap_or_else(|| Arc::new(Counters::default())),
        }
    }
}

impl Default for ConsumerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
