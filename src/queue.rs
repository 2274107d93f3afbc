//! Redis-backed FIFO job queue.
//!
//! Producers RPUSH a JSON `{"job_id", "payload"}` message onto a named
//! list; the worker BLPOPs the head with a bounded timeout. The pop is
//! destructive with no acknowledgement, so delivery is at-most-once: a
//! worker crash mid-job loses that job. There is deliberately no silent
//! no-op fallback for a missing transport; the caller must fail startup
//! with a configuration error instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{Commands, Connection};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::QueueMessage;

/// Errors that can occur on the queue transport.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("failed to encode queue message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// FIFO handoff of job messages between producer and worker.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a message to the tail of the queue. Never blocks; fails
    /// only if the transport is unavailable.
    async fn enqueue(&self, job_id: &str, payload: &serde_json::Value) -> Result<(), QueueError>;

    /// Pop the head of the queue, blocking up to `timeout`.
    ///
    /// Returns `None` on timeout. The pop is atomic, so concurrent
    /// consumers never observe the same message twice. A message that
    /// cannot be decoded is logged and discarded rather than crashing
    /// the consumer loop.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError>;
}

/// `JobQueue` over a Redis list.
pub struct RedisJobQueue {
    conn: Arc<Mutex<Connection>>,
    queue_name: String,
}

impl RedisJobQueue {
    /// Connect to the Redis transport and bind to the named list.
    pub fn connect(url: &str, queue_name: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue_name: queue_name.into(),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: &str, payload: &serde_json::Value) -> Result<(), QueueError> {
        let message = QueueMessage {
            job_id: job_id.to_string(),
            payload: payload.clone(),
        };
        let body = serde_json::to_string(&message)?;

        let mut conn = self.conn.lock().await;
        let _: () = conn.rpush(&self.queue_name, body)?;
        drop(conn);

        info!(%job_id, queue = %self.queue_name, "Enqueued job");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let mut conn = self.conn.lock().await;
        let result: Option<(String, String)> =
            conn.blpop(&self.queue_name, timeout.as_secs_f64())?;
        drop(conn);

        match result {
            None => {
                debug!(queue = %self.queue_name, "Dequeue timed out with no job");
                Ok(None)
            }
            Some((_, body)) => match serde_json::from_str::<QueueMessage>(&body) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    warn!(error = %e, raw = %body, "Discarding malformed queue message");
                    Ok(None)
                }
            },
        }
    }
}
