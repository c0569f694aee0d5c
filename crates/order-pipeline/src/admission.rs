//! # Request-Path Admission
//!
//! The two ways an inbound order enters the system.
//!
//! | Component | Calls the gate | Returns when |
//! |-----------|----------------|--------------|
//! | [`SyncAdmission`] | yes, in the caller's request | the payment finished |
//! | [`AsyncPublisher`] | never | the order was handed to the topic |
//!
//! `SyncAdmission` has no admission control of its own. Beyond `N` concurrent callers
//! requests simply wait inside [`PaymentGate::process`] for a token, and that wait is
//! part of the elapsed time they report.
//!
//! Both validate first: a malformed order is rejected before a token is touched or
//! anything is published.

use crate::envelope::encode_order;
use crate::error::AdmissionError;
use crate::gate::PaymentGate;
use crate::model::{NewOrder, Order};
use crate::transport::Publisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// A completed synchronous submission.
#[derive(Debug, Clone)]
pub struct SyncReceipt {
    pub order: Order,
    /// Wall time from admission to payment completion, token wait included.
    pub elapsed: Duration,
}

/// Processes an order's payment before answering.
#[derive(Debug, Clone)]
pub struct SyncAdmission {
    gate: PaymentGate,
}

impl SyncAdmission {
    pub fn new(gate: PaymentGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &PaymentGate {
        &self.gate
    }

    #[instrument(skip_all, fields(order_id = tracing::field::Empty))]
    pub async fn submit(&self, request: NewOrder) -> Result<SyncReceipt, AdmissionError> {
        let started = Instant::now();
        let mut order = Order::admit(request)?;
        tracing::Span::current().record("order_id", order.order_id.as_str());

        order.begin_processing()?;
        info!(customer_id = order.customer_id, "Processing order synchronously");

        // Run the payment on its own task so an abandoned request cannot cut it short
        // while it holds a token.
        let gate = self.gate.clone();
        let paying = order.clone();
        let outcome = tokio::spawn(async move { gate.process(&paying).await }).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(())) => {
                order.complete()?;
                info!(elapsed_ms = elapsed.as_millis() as u64, "Order completed");
                Ok(SyncReceipt { order, elapsed })
            }
            Ok(Err(source)) => {
                order.fail()?;
                warn!(elapsed_ms = elapsed.as_millis() as u64, error = %source, "Order failed");
                Err(AdmissionError::Payment {
                    order_id: order.order_id,
                    elapsed,
                    source,
                })
            }
            Err(e) => Err(AdmissionError::Aborted {
                order_id: order.order_id,
                reason: e.to_string(),
            }),
        }
    }
}

/// An order accepted for later processing.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub order: Order,
    /// Id assigned by the pub/sub transport.
    pub message_id: String,
}

/// Hands orders to the pub/sub topic and returns straight away.
#[derive(Clone)]
pub struct AsyncPublisher {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl AsyncPublisher {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Publishes a `pending` order. Publish failures are not retried here.
    #[instrument(skip_all, fields(order_id = tracing::field::Empty, topic = %self.topic))]
    pub async fn submit(&self, request: NewOrder) -> Result<Accepted, AdmissionError> {
        let order = Order::admit(request)?;
        tracing::Span::current().record("order_id", order.order_id.as_str());

        let payload = encode_order(&order)?;
        match self.publisher.publish(&self.topic, &payload).await {
            Ok(message_id) => {
                info!(%message_id, customer_id = order.customer_id, "Order queued");
                Ok(Accepted { order, message_id })
            }
            Err(source) => {
                warn!(error = %source, "Failed to publish order");
                Err(AdmissionError::Publish {
                    order_id: order.order_id,
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for AsyncPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPublisher")
            .field("topic", &self.topic)
            .finish()
    }
}
