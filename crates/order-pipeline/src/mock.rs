//! # Mock Transports & Backends
//!
//! Test doubles for every seam of the pipeline, so consumers and request-path
//! components can be exercised without a broker or a real payment service.
//!
//! | Double | Replaces | Lets you |
//! |--------|----------|----------|
//! | [`MockQueue`] | [`QueueTransport`] | script receive results, inject delete failures, count deletes |
//! | [`MockPublisher`] | [`Publisher`] | script publish failures, inspect published payloads |
//! | [`ScriptedBackend`] | [`PaymentBackend`] | fail chosen orders, measure peak concurrency |
//!
//! ## Example
//!
//! ```rust
//! use order_pipeline::error::TransportError;
//! use order_pipeline::mock::MockQueue;
//! use order_pipeline::transport::{QueueTransport, ReceiveOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = MockQueue::new();
//!     mock.expect_receive()
//!         .return_err(TransportError::Receive("throttled".into()));
//!     mock.expect_receive().return_ok(vec![MockQueue::message("h-1", "{}")]);
//!
//!     assert!(mock.receive(ReceiveOptions::default()).await.is_err());
//!     let batch = mock.receive(ReceiveOptions::default()).await.unwrap();
//!     mock.delete(&batch[0].receipt_handle).await.unwrap();
//!
//!     assert_eq!(mock.delete_count("h-1"), 1);
//!     mock.verify();
//! }
//! ```
//!
//! Once its scripted receives are used up, a `MockQueue` behaves like an idle queue:
//! each receive waits out the poll wait time and returns nothing.

use crate::error::{PaymentError, TransportError};
use crate::gate::PaymentBackend;
use crate::model::Order;
use crate::transport::{Publisher, QueueMessage, QueueTransport, ReceiveOptions};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// QUEUE
// =============================================================================

type ReceiveResult = Result<Vec<QueueMessage>, TransportError>;

#[derive(Default)]
struct QueueScript {
    receives: VecDeque<ReceiveResult>,
    deleted: Vec<String>,
    failing_deletes: HashSet<String>,
    receive_calls: usize,
}

/// A [`QueueTransport`] that replays scripted receive results.
#[derive(Clone, Default)]
pub struct MockQueue {
    script: Arc<Mutex<QueueScript>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message whose receipt handle and id are both `handle`.
    pub fn message(handle: &str, body: &str) -> QueueMessage {
        QueueMessage {
            message_id: handle.to_string(),
            receipt_handle: handle.to_string(),
            body: body.to_string(),
            receive_count: 1,
        }
    }

    /// Queues up the result of the next `receive` call.
    pub fn expect_receive(&self) -> ReceiveExpectationBuilder {
        ReceiveExpectationBuilder {
            script: self.script.clone(),
        }
    }

    /// Makes every delete of `receipt_handle` fail.
    pub fn fail_delete(&self, receipt_handle: &str) {
        self.script
            .lock()
            .unwrap()
            .failing_deletes
            .insert(receipt_handle.to_string());
    }

    /// Receipt handles successfully deleted, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.script.lock().unwrap().deleted.clone()
    }

    pub fn delete_count(&self, receipt_handle: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .deleted
            .iter()
            .filter(|h| h.as_str() == receipt_handle)
            .count()
    }

    pub fn receive_calls(&self) -> usize {
        self.script.lock().unwrap().receive_calls
    }

    /// Panics if scripted receives were left unused.
    pub fn verify(&self) {
        let script = self.script.lock().unwrap();
        if !script.receives.is_empty() {
            panic!(
                "Not all receive expectations were met. {} remaining",
                script.receives.len()
            );
        }
    }
}

#[async_trait]
impl QueueTransport for MockQueue {
    async fn receive(&self, options: ReceiveOptions) -> ReceiveResult {
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.receive_calls += 1;
            script.receives.pop_front()
        };
        match scripted {
            Some(result) => result,
            None => {
                tokio::time::sleep(options.wait_time).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), TransportError> {
        let mut script = self.script.lock().unwrap();
        if script.failing_deletes.contains(receipt_handle) {
            return Err(TransportError::Delete(format!(
                "scripted failure for {receipt_handle}"
            )));
        }
        script.deleted.push(receipt_handle.to_string());
        Ok(())
    }
}

/// Builder for `receive` expectations.
pub struct ReceiveExpectationBuilder {
    script: Arc<Mutex<QueueScript>>,
}

impl ReceiveExpectationBuilder {
    pub fn return_ok(self, messages: Vec<QueueMessage>) {
        self.script.lock().unwrap().receives.push_back(Ok(messages));
    }

    pub fn return_err(self, error: TransportError) {
        self.script.lock().unwrap().receives.push_back(Err(error));
    }
}

// =============================================================================
// PUBLISHER
// =============================================================================

#[derive(Default)]
struct PublishScript {
    results: VecDeque<Result<String, TransportError>>,
    published: Vec<(String, String)>,
    next_id: usize,
}

/// A [`Publisher`] that records payloads and replays scripted results.
///
/// Without a scripted result, publishing succeeds with ids `msg-1`, `msg-2`, ...
#[derive(Clone, Default)]
pub struct MockPublisher {
    script: Arc<Mutex<PublishScript>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_publish(&self) -> PublishExpectationBuilder {
        PublishExpectationBuilder {
            script: self.script.clone(),
        }
    }

    /// `(topic, payload)` pairs of successful publishes.
    pub fn published(&self) -> Vec<(String, String)> {
        self.script.lock().unwrap().published.clone()
    }

    pub fn verify(&self) {
        let script = self.script.lock().unwrap();
        if !script.results.is_empty() {
            panic!(
                "Not all publish expectations were met. {} remaining",
                script.results.len()
            );
        }
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<String, TransportError> {
        let mut script = self.script.lock().unwrap();
        let result = match script.results.pop_front() {
            Some(result) => result,
            None => {
                script.next_id += 1;
                Ok(format!("msg-{}", script.next_id))
            }
        };
        if result.is_ok() {
            script
                .published
                .push((topic.to_string(), payload.to_string()));
        }
        result
    }
}

/// Builder for `publish` expectations.
pub struct PublishExpectationBuilder {
    script: Arc<Mutex<PublishScript>>,
}

impl PublishExpectationBuilder {
    pub fn return_ok(self, message_id: &str) {
        self.script
            .lock()
            .unwrap()
            .results
            .push_back(Ok(message_id.to_string()));
    }

    pub fn return_err(self, error: TransportError) {
        self.script.lock().unwrap().results.push_back(Err(error));
    }
}

// =============================================================================
// PAYMENT BACKEND
// =============================================================================

/// A [`PaymentBackend`] with a fixed service time, per-order failures and
/// concurrency instrumentation.
#[derive(Default)]
pub struct ScriptedBackend {
    service_time: Duration,
    failing: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(service_time: Duration) -> Self {
        Self {
            service_time,
            ..Self::default()
        }
    }

    /// Declines every payment for `order_id`.
    pub fn fail_order(&self, order_id: &str) {
        self.failing.lock().unwrap().insert(order_id.to_string());
    }

    pub fn set_fail_all(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    /// Most verifications ever observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn declines(&self, order_id: &str) -> bool {
        *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(order_id)
    }
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentBackend for ScriptedBackend {
    async fn verify(&self, order: &Order) -> Result<(), PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);

        tokio::time::sleep(self.service_time).await;

        if self.declines(&order.order_id) {
            Err(PaymentError::Declined(format!(
                "scripted decline for {}",
                order.order_id
            )))
        } else {
            Ok(())
        }
    }
}
