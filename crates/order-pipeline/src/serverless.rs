//! # Serverless Consumer
//!
//! Entry point for a platform that delivers pub/sub notifications itself and invokes us
//! once per batch. There is no polling, no worker pool and no acknowledgement: records
//! are processed one after another, and the invocation result tells the platform
//! whether to redeliver the whole batch.
//!
//! - A record whose order does not decode is logged and skipped.
//! - The first payment failure stops the batch and fails the invocation.

use crate::envelope::decode_order;
use crate::error::ConsumerError;
use crate::gate::PaymentGate;
use serde::Deserialize;
use tracing::{info, instrument, warn};

/// A batch of notifications as delivered by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct SnsEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<SnsEventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnsEventRecord {
    #[serde(rename = "Sns")]
    pub sns: SnsMessage,
}

/// The notification itself; `message` is the order JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct SnsMessage {
    #[serde(rename = "MessageId", default)]
    pub message_id: String,
    #[serde(rename = "Message")]
    pub message: String,
}

/// Summary of a successful invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationReport {
    pub completed: usize,
    pub skipped: usize,
}

pub struct SingleEventConsumer {
    gate: PaymentGate,
}

impl SingleEventConsumer {
    pub fn new(gate: PaymentGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &PaymentGate {
        &self.gate
    }

    /// Parses a raw event document and handles it.
    pub async fn handle_json(&self, event: &str) -> Result<InvocationReport, ConsumerError> {
        let event: SnsEvent = serde_json::from_str(event).map_err(ConsumerError::Event)?;
        self.handle(event).await
    }

    #[instrument(skip_all, fields(records = event.records.len()))]
    pub async fn handle(&self, event: SnsEvent) -> Result<InvocationReport, ConsumerError> {
        let mut report = InvocationReport::default();

        for record in event.records {
            let mut order = match decode_order(&record.sns.message) {
                Ok(order) => order,
                Err(e) => {
                    warn!(message_id = %record.sns.message_id, error = %e, "Skipping undecodable record");
                    report.skipped += 1;
                    continue;
                }
            };

            order.begin_processing()?;
            info!(order_id = %order.order_id, customer_id = order.customer_id, "Processing order");

            if let Err(source) = self.gate.process(&order).await {
                order.fail()?;
                warn!(order_id = %order.order_id, error = %source, "Payment failed, failing invocation");
                return Err(ConsumerError::Payment {
                    order_id: order.order_id,
                    source,
                });
            }
            order.complete()?;
            info!(order_id = %order.order_id, "Payment completed");
            report.completed += 1;
        }

        Ok(report)
    }
}
