//! Message queue boundary (at-least-once delivery).
//!
//! A received message stays invisible to other consumers for its visibility
//! timeout. It disappears only when acknowledged; otherwise it is redelivered
//! with an incremented receive count; deferred deliveries are not counted.
//! Receipts are per delivery, so an ack for an expired delivery is rejected.

pub mod in_memory;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use in_memory::InMemoryQueue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The receipt belongs to an expired or already settled delivery.
    #[error("stale receipt for message {0}")]
    StaleReceipt(String),
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt: String,
    pub body: Vec<u8>,
    /// How many times this message has been received, this delivery included.
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// A message parked on the dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub message_id: String,
    pub body: String,
    pub reason: String,
    pub receive_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message body; returns its id.
    async fn send(&self, body: Vec<u8>) -> Result<String, QueueError>;

    /// Long-poll for up to `max` messages, waiting at most `wait`.
    ///
    /// Returned messages are hidden from other receivers for `visibility`.
    async fn receive(
        &self,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a received message for good.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Give a received message back, visible again after `delay`.
    async fn release(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError>;

    /// Like `release`, but this delivery does not count toward the receive
    /// count. Used for messages handed back unprocessed.
    async fn defer(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError>;

    /// Copy a message to the dead-letter queue. The caller still acks it.
    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError>;
}

#[async_trait::async_trait]
impl<Q> MessageQueue for Arc<Q>
where
    Q: MessageQueue + ?Sized,
{
    async fn send(&self, body: Vec<u8>) -> Result<String, QueueError> {
        (**self).send(body).await
    }

    async fn receive(
        &self,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        (**self).receive(max, wait, visibility).await
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        (**self).ack(message).await
    }

    async fn release(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError> {
        (**self).release(message, delay).await
    }

    async fn defer(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError> {
        (**self).defer(message, delay).await
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        (**self).dead_letter(message, reason).await
    }
}
