//! # Pipeline Errors
//!
//! One error type per concern, so callers can tell a bad request from a failed
//! payment from a transport hiccup without string matching.
//!
//! | Type | Raised by | Handling |
//! |------|-----------|----------|
//! | [`ValidationError`] | request admission | rejected before any capacity token is touched |
//! | [`StatusError`] | status transitions | order left as it was |
//! | [`PaymentError`] | [`PaymentGate`](crate::gate::PaymentGate) | counted as `failed`, message kept for redelivery |
//! | [`TransportError`] | publish / receive / delete | surfaced, backed off, or logged (see each caller) |
//! | [`EnvelopeError`] | queue payload decoding | message dropped without acknowledgement |
//! | [`ConsumerError`] | serverless invocation | whole invocation fails |
//! | [`AdmissionError`] | request path | reported to the caller |

use crate::model::OrderStatus;
use std::time::Duration;
use thiserror::Error;

/// A request body that does not describe a valid order.
#[derive(Debug, Error)]
#[error("invalid order: {0}")]
pub struct ValidationError(#[from] pub validator::ValidationErrors);

/// Attempted to move an order's status backwards or sideways.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal status transition {from} -> {to}")]
pub struct StatusError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Outcome of a payment attempt that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),
    #[error("payment backend unavailable: {0}")]
    Unavailable(String),
    #[error("payment gate closed")]
    GateClosed,
}

/// Failures talking to the pub/sub or queue transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("receipt handle is no longer valid: {0}")]
    InvalidReceiptHandle(String),
}

/// A queue message whose body could not be turned back into an order.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed pub/sub envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed order payload: {0}")]
    Order(#[source] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Failure of a whole serverless invocation.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("malformed event: {0}")]
    Event(#[source] serde_json::Error),
    #[error("payment failed for order {order_id}: {source}")]
    Payment {
        order_id: String,
        #[source]
        source: PaymentError,
    },
    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Why a request-path submission did not succeed.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("payment failed for order {order_id} after {elapsed:?}: {source}")]
    Payment {
        order_id: String,
        elapsed: Duration,
        #[source]
        source: PaymentError,
    },
    #[error("failed to publish order {order_id}: {source}")]
    Publish {
        order_id: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to serialize order: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("payment task for order {order_id} aborted: {reason}")]
    Aborted { order_id: String, reason: String },
}
