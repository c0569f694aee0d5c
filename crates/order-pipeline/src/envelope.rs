//! # Envelopes
//!
//! A queued order is wrapped twice:
//!
//! ```text
//! QueueMessage { receipt_handle, body }          <- queue delivery
//!   body = {"Type": "Notification", "Message": "<order json>", ...}   <- pub/sub
//!     Message = {"order_id": ..., "customer_id": ..., ...}            <- the order
//! ```
//!
//! [`unwrap_order`] peels both layers; [`decode_order`] handles the inner one alone for
//! consumers whose platform already removed the outer layer.

use crate::error::{EnvelopeError, ValidationError};
use crate::model::Order;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// The pub/sub notification wrapper around a published payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubEnvelope {
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "MessageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(rename = "TopicArn", default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(rename = "Message")]
    pub message: String,
}

impl PubSubEnvelope {
    pub fn notification(topic: &str, message_id: &str, payload: &str) -> Self {
        Self {
            kind: Some("Notification".to_string()),
            message_id: Some(message_id.to_string()),
            topic: Some(topic.to_string()),
            message: payload.to_string(),
        }
    }

    pub fn parse(body: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(body).map_err(EnvelopeError::Envelope)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub fn encode_order(order: &Order) -> Result<String, serde_json::Error> {
    serde_json::to_string(order)
}

/// Parses and validates an order payload.
pub fn decode_order(payload: &str) -> Result<Order, EnvelopeError> {
    let order: Order = serde_json::from_str(payload).map_err(EnvelopeError::Order)?;
    order.validate().map_err(ValidationError::from)?;
    Ok(order)
}

/// Recovers the order from a queue message body.
pub fn unwrap_order(body: &str) -> Result<Order, EnvelopeError> {
    let envelope = PubSubEnvelope::parse(body)?;
    decode_order(&envelope.message)
}
