//! The job envelope: what to run plus per-job policy.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Boxed future produced by task callables and payload handlers.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A self-contained unit of work.
///
/// The token is cancelled when the job's deadline passes or the queue shuts
/// down; long-running tasks should watch it and return promptly.
pub type TaskFn = Arc<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>;

/// The primary work source of a message: an opaque payload handed to the
/// worker's registered handler, or an in-process callable.
#[derive(Clone)]
pub enum Work {
    Payload(Vec<u8>),
    Task(TaskFn),
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Work::Payload(payload) => f.debug_tuple("Payload").field(&payload.len()).finish(),
            Work::Task(_) => f.write_str("Task"),
        }
    }
}

/// A single queued unit of work plus its per-job policy.
///
/// Immutable once submitted; the option setters consume and return the
/// message builder-style.
#[derive(Clone, Debug)]
pub struct Message {
    work: Work,

    /// Wall-clock limit for one execution attempt. Zero means unset, in
    /// which case the worker's default applies.
    pub timeout: Duration,

    /// Advisory retry budget for policy layers; the dispatcher itself never
    /// retries.
    pub retry_count: i64,

    /// Advisory delay between retries.
    pub retry_delay: Duration,
}

impl Message {
    /// A message carrying an opaque payload for the worker's handler.
    pub fn payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            work: Work::Payload(payload.into()),
            timeout: Duration::ZERO,
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// A message carrying an in-process task.
    pub fn task<F, Fut>(task: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            work: Work::Task(Arc::new(move |token| -> TaskFuture { Box::pin(task(token)) })),
            timeout: Duration::ZERO,
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i64) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn into_work(self) -> Work {
        self.work
    }

    /// The payload view of the message. Empty for task messages.
    pub fn bytes(&self) -> &[u8] {
        match &self.work {
            Work::Payload(payload) => payload,
            Work::Task(_) => &[],
        }
    }

    /// Serialize to the JSON wire form. The callable is transient state and
    /// is never shipped; a task message encodes with an empty body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = Wire {
            timeout: self.timeout,
            body: self.bytes().to_vec(),
            retry_count: self.retry_count,
            retry_delay: self.retry_delay,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decode the JSON wire form. Always yields a payload message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: Wire = serde_json::from_slice(bytes)?;
        Ok(Self {
            work: Work::Payload(wire.body),
            timeout: wire.timeout,
            retry_count: wire.retry_count,
            retry_delay: wire.retry_delay,
        })
    }
}

/// Wire record: durations as integer nanoseconds, body as base64.
#[derive(Serialize, Deserialize)]
struct Wire {
    #[serde(with = "nanos")]
    timeout: Duration,
    #[serde(with = "b64")]
    body: Vec<u8>,
    retry_count: i64,
    #[serde(with = "nanos")]
    retry_delay: Duration,
}

mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(d)?))
    }
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_payload_and_policy() {
        let msg = Message::payload(b"hello".to_vec())
            .with_timeout(Duration::from_millis(100))
            .with_retry_count(3)
            .with_retry_delay(Duration::from_secs(1));

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.bytes(), b"hello");
        assert_eq!(decoded.timeout, Duration::from_millis(100));
        assert_eq!(decoded.retry_count, 3);
        assert_eq!(decoded.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn task_message_encodes_empty_body() {
        let msg = Message::task(|_token| async { Ok(()) }).with_timeout(Duration::from_secs(1));

        let decoded = Message::decode(&msg.encode().unwrap()).unwrap();

        assert!(decoded.bytes().is_empty());
        assert!(matches!(decoded.work(), Work::Payload(_)));
        assert_eq!(decoded.timeout, Duration::from_secs(1));
    }

    #[test]
    fn wire_shape_matches_broker_format() {
        let msg = Message::payload(b"body".to_vec()).with_timeout(Duration::from_millis(1));
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["timeout"], 1_000_000);
        assert_eq!(value["retry_count"], 0);
        assert_eq!(value["retry_delay"], 0);
        // base64 of "body"
        assert_eq!(value["body"], "Ym9keQ==");
    }
}
