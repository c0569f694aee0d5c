//! # Transport Seams
//!
//! The pub/sub topic and the pull-based queue are external collaborators. This module
//! fixes the only contract the pipeline relies on:
//!
//! - [`Publisher`]: hand a UTF-8 payload to a named topic.
//! - [`QueueTransport`]: long-poll a batch of messages, then acknowledge each one by
//!   its receipt handle. Anything not acknowledged reappears once its visibility window
//!   runs out.
//!
//! [`InMemoryBroker`](crate::broker::InMemoryBroker) implements both for local runs and
//! tests; [`mock`](crate::mock) has scripted doubles.

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

/// A delivery handed out by a [`QueueTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub message_id: String,
    /// Opaque token identifying this particular delivery; needed to delete it.
    pub receipt_handle: String,
    /// The pub/sub envelope JSON.
    pub body: String,
    /// How many times this message has been handed out, this delivery included.
    pub receive_count: u32,
}

/// Parameters of a single long poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Upper bound on messages returned.
    pub max_messages: usize,
    /// How long to wait for the first message before returning an empty batch.
    pub wait_time: Duration,
    /// How long received messages stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// Fire-and-forget side of the pub/sub transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `payload` to `topic` and returns the transport's message id.
    async fn publish(&self, topic: &str, payload: &str) -> Result<String, TransportError>;
}

/// Pull side of the queue transport.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn receive(&self, options: ReceiveOptions) -> Result<Vec<QueueMessage>, TransportError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError>;
}
