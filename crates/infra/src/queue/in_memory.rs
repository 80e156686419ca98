use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{DeadLetterEntry, MessageQueue, QueueError, QueueMessage};

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: Vec<u8>,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<String>,
    enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    /// Keyed by enqueue sequence so receive order is FIFO among visible messages.
    entries: BTreeMap<u64, Entry>,
    acks: HashMap<String, u32>,
    dead_letters: Vec<DeadLetterEntry>,
}

impl State {
    fn find_delivery(&mut self, message: &QueueMessage) -> Result<u64, QueueError> {
        self.entries
            .iter()
            .find(|(_, e)| {
                e.message_id == message.message_id
                    && e.receipt.as_deref() == Some(message.receipt.as_str())
            })
            .map(|(seq, _)| *seq)
            .ok_or_else(|| QueueError::StaleReceipt(message.message_id.clone()))
    }
}

/// In-process queue with visibility timeouts.
///
/// Intended for tests/dev and for single-process deployments fed through
/// the HTTP surface.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("lock poisoned".to_string()))
    }

    /// Messages not yet acknowledged (visible or in flight).
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a message was acknowledged.
    pub fn ack_count(&self, message_id: &str) -> u32 {
        self.lock()
            .map(|s| s.acks.get(message_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    /// Receive count of an unacknowledged message.
    pub fn receive_count(&self, message_id: &str) -> Option<u32> {
        self.lock().ok().and_then(|s| {
            s.entries
                .values()
                .find(|e| e.message_id == message_id)
                .map(|e| e.receive_count)
        })
    }

    fn give_back(
        &self,
        message: &QueueMessage,
        delay: Duration,
        uncount: bool,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            let seq = state.find_delivery(message)?;
            if let Some(entry) = state.entries.get_mut(&seq) {
                entry.receipt = None;
                entry.visible_at = Instant::now() + delay;
                if uncount {
                    entry.receive_count = entry.receive_count.saturating_sub(1);
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn take_visible(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<(Vec<QueueMessage>, Option<Instant>), QueueError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for entry in state.entries.values_mut() {
            if entry.visible_at > now {
                next_visible = Some(next_visible.map_or(entry.visible_at, |n| n.min(entry.visible_at)));
                continue;
            }
            if batch.len() >= max {
                break;
            }

            let receipt = Uuid::now_v7().to_string();
            entry.receipt = Some(receipt.clone());
            entry.receive_count += 1;
            entry.visible_at = now + visibility;
            batch.push(QueueMessage {
                message_id: entry.message_id.clone(),
                receipt,
                body: entry.body.clone(),
                receive_count: entry.receive_count,
                enqueued_at: entry.enqueued_at,
            });
        }
        Ok((batch, next_visible))
    }
}

#[async_trait::async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: Vec<u8>) -> Result<String, QueueError> {
        let message_id = Uuid::now_v7().to_string();
        {
            let mut state = self.lock()?;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(
                seq,
                Entry {
                    message_id: message_id.clone(),
                    body,
                    receive_count: 0,
                    visible_at: Instant::now(),
                    receipt: None,
                    enqueued_at: Utc::now(),
                },
            );
        }
        self.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let max = max.max(1);
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before looking, so a send in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_visible) = self.take_visible(max, visibility)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        let seq = state.find_delivery(message)?;
        state.entries.remove(&seq);
        *state.acks.entry(message.message_id.clone()).or_default() += 1;
        Ok(())
    }

    async fn release(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError> {
        self.give_back(message, delay, false)
    }

    async fn defer(&self, message: &QueueMessage, delay: Duration) -> Result<(), QueueError> {
        self.give_back(message, delay, true)
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.find_delivery(message)?;
        state.dead_letters.push(DeadLetterEntry {
            message_id: message.message_id.clone(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
            reason: reason.to_string(),
            receive_count: message.receive_count,
            dead_lettered_at: Utc::now(),
        });
        Ok(())
    }
}
