//! # In-Memory Broker
//!
//! Process-local stand-ins for the pub/sub topic and the subscribed queue, so the whole
//! pipeline runs without any cloud services.
//!
//! ## Queue Semantics
//!
//! [`InMemoryQueue`] follows the usual pull-queue contract:
//!
//! - **Long polling**: `receive` returns as soon as at least one message is visible,
//!   otherwise waits up to `wait_time` and returns an empty batch.
//! - **Visibility timeout**: received messages are hidden for `visibility_timeout`.
//!   If not deleted by then they become visible again and are redelivered.
//! - **Receipt handles**: every delivery gets a fresh handle. Only the latest handle of
//!   a message can delete it; older ones fail with
//!   [`TransportError::InvalidReceiptHandle`].
//!
//! All timing uses [`tokio::time::Instant`], so paused-clock tests see exact behaviour.

use crate::envelope::PubSubEnvelope;
use crate::error::TransportError;
use crate::transport::{Publisher, QueueMessage, QueueTransport, ReceiveOptions};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Largest batch a single receive may return.
pub const MAX_BATCH_SIZE: usize = 10;

struct StoredMessage {
    message_id: String,
    body: String,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
}

impl QueueState {
    fn take_visible(&mut self, now: Instant, options: &ReceiveOptions) -> Vec<QueueMessage> {
        let limit = options.max_messages.clamp(1, MAX_BATCH_SIZE);
        let mut batch = Vec::new();
        for stored in self.messages.iter_mut() {
            if batch.len() == limit {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            let receipt_handle = Uuid::new_v4().to_string();
            stored.receipt_handle = Some(receipt_handle.clone());
            stored.visible_at = now + options.visibility_timeout;
            stored.receive_count += 1;
            batch.push(QueueMessage {
                message_id: stored.message_id.clone(),
                receipt_handle,
                body: stored.body.clone(),
                receive_count: stored.receive_count,
            });
        }
        batch
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.messages.iter().map(|m| m.visible_at).min()
    }
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
    arrivals: Notify,
}

/// A pull queue with long polling and visibility timeouts.
///
/// Clones share the same underlying queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<QueueInner>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                arrivals: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueues a raw body, visible immediately. Returns the new message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.state().messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: body.into(),
            visible_at: Instant::now(),
            receipt_handle: None,
            receive_count: 0,
        });
        self.inner.arrivals.notify_waiters();
        message_id
    }

    /// Messages not yet deleted, whether visible or in flight.
    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages a receive issued now would be able to return.
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.state()
            .messages
            .iter()
            .filter(|m| m.visible_at <= now)
            .count()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<QueueMessage>, TransportError> {
        let deadline = Instant::now() + options.wait_time;
        loop {
            // Register for arrivals before looking, so a push in between is not missed.
            let arrival = self.inner.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            let next_visible = {
                let mut state = self.state();
                let batch = state.take_visible(Instant::now(), &options);
                if !batch.is_empty() {
                    debug!(queue = %self.inner.name, count = batch.len(), "Delivered batch");
                    return Ok(batch);
                }
                state.next_visible_at()
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut arrival => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        let position = state
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| TransportError::InvalidReceiptHandle(receipt_handle.to_string()))?;
        state.messages.remove(position);
        debug!(queue = %self.inner.name, remaining = state.messages.len(), "Deleted message");
        Ok(())
    }
}

/// Named topics fanning out to subscribed queues.
///
/// Every subscriber receives its own copy of each published payload, wrapped in a
/// [`PubSubEnvelope`].
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    topics: Arc<Mutex<HashMap<String, Vec<InMemoryQueue>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `topic` if it does not exist yet.
    pub fn create_topic(&self, topic: &str) {
        self.topics().entry(topic.to_string()).or_default();
    }

    pub fn subscribe(&self, topic: &str, queue: &InMemoryQueue) -> Result<(), TransportError> {
        let mut topics = self.topics();
        let subscribers = topics
            .get_mut(topic)
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;
        subscribers.push(queue.clone());
        Ok(())
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, Vec<InMemoryQueue>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<String, TransportError> {
        let subscribers = self
            .topics()
            .get(topic)
            .cloned()
            .ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))?;

        let message_id = Uuid::new_v4().to_string();
        let body = PubSubEnvelope::notification(topic, &message_id, payload)
            .to_json()
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        for queue in &subscribers {
            queue.push(body.clone());
        }
        debug!(topic, %message_id, subscribers = subscribers.len(), "Published");
        Ok(message_id)
    }
}
