//! # Queue Consumer Pool
//!
//! Bridges a pull-based [`QueueTransport`] to the [`PaymentGate`] with one poll loop and
//! a fixed set of worker tasks.
//!
//! ```text
//!             receive (≤ batch, wait ≤ poll_wait)
//! transport ───────────────────────────────▶ poll loop
//!                                              │ send (blocks when full)
//!                                              ▼
//!                                  bounded hand-off queue
//!                                   │        │        │
//!                                worker 1 worker 2 … worker W
//!                                   │ unwrap → gate.process → delete on success
//! ```
//!
//! ## Poll Loop
//!
//! `Idle → Polling → Dispatching → Idle`, forever. A receive error never ends the loop:
//! it sleeps `error_backoff` and polls again. Dispatch pushes into a bounded channel, so
//! a full hand-off queue stalls polling instead of draining the transport into memory.
//!
//! ## Per-Message Handling
//!
//! See [`DeliveryHandler::handle`]. The rule that matters: a message is deleted if and
//! only if its order's payment completed in this delivery. Undecodable messages and
//! failed payments are left for the transport to redeliver after the visibility timeout.
//!
//! ## Redelivery
//!
//! Payments are not idempotent, so the handler remembers the ids of the most recent
//! settled orders ([`SettledOrders`]). A redelivered message for one of them (typically
//! a success whose delete failed) is acknowledged without paying again.
//!
//! An order id is also claimed for the length of its payment. A second copy that shows
//! up while the first is still paying (its visibility timeout ran out while it waited
//! for the gate) is left undeleted and comes back later, by which time the order is
//! either settled or free to retry.
//!
//! ## Shutdown
//!
//! Cancelling the token passed to [`QueueConsumerPool::run`] stops polling. The hand-off
//! channel then closes, workers finish what was already handed to them, and `run`
//! returns. Messages received but not yet dispatched simply reappear after their
//! visibility timeout.

use crate::envelope::unwrap_order;
use crate::gate::PaymentGate;
use crate::model::{Order, OrderStatus};
use crate::transport::{QueueMessage, QueueTransport, ReceiveOptions};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Tuning of the poll loop and worker pool.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of worker tasks (W).
    pub workers: usize,
    /// Capacity of the hand-off queue between the poll loop and the workers.
    pub handoff_capacity: usize,
    /// Long-poll wait bound.
    pub poll_wait: Duration,
    /// Maximum messages per receive.
    pub batch_size: usize,
    /// Visibility window requested on each receive.
    pub visibility_timeout: Duration,
    /// Sleep after a failed receive.
    pub error_backoff: Duration,
    /// How many settled order ids to remember for redelivery detection. 0 disables it.
    pub dedup_window: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            handoff_capacity: 100,
            poll_wait: Duration::from_secs(20),
            batch_size: 10,
            visibility_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
            dedup_window: 10_000,
        }
    }
}

impl ConsumerConfig {
    pub fn receive_options(&self) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: self.batch_size,
            wait_time: self.poll_wait,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Payment completed and the message was deleted.
    Completed,
    /// The order had already been settled; the message was deleted without paying.
    AlreadySettled,
    /// Payment failed; the message was kept for redelivery.
    PaymentFailed(String),
    /// The body did not hold a processable order; the message was kept.
    Dropped(String),
    /// Another delivery of the same order is paying right now; the message was kept.
    InFlight,
    /// Payment completed (or was already settled) but the delete failed.
    AckFailed(String),
}

/// Bounded memory of order ids whose payment completed, plus the ids being paid now.
///
/// Oldest settled ids are forgotten first once `capacity` is exceeded.
#[derive(Clone)]
pub struct SettledOrders {
    capacity: usize,
    inner: Arc<Mutex<SettledInner>>,
}

#[derive(Default)]
struct SettledInner {
    ids: HashSet<String>,
    order: VecDeque<String>,
    in_flight: HashSet<String>,
}

/// Result of [`SettledOrders::claim`].
pub enum Claim {
    /// The order was settled earlier.
    Settled,
    /// Another delivery holds the order.
    InFlight,
    /// The caller now owns the order until the guard is dropped.
    Acquired(ClaimGuard),
}

/// Exclusive hold on one order id. Dropping it releases the id.
pub struct ClaimGuard {
    orders: SettledOrders,
    order_id: String,
}

impl ClaimGuard {
    /// Records the order as settled. The hold itself is released on drop.
    pub fn settle(&self) {
        self.orders.insert(&self.order_id);
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.orders
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .remove(&self.order_id);
    }
}

impl SettledOrders {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(SettledInner::default())),
        }
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(order_id)
    }

    /// Checks for a settled or in-flight order and claims it otherwise, in one step.
    pub fn claim(&self, order_id: &str) -> Claim {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.ids.contains(order_id) {
            return Claim::Settled;
        }
        if !inner.in_flight.insert(order_id.to_string()) {
            return Claim::InFlight;
        }
        Claim::Acquired(ClaimGuard {
            orders: self.clone(),
            order_id: order_id.to_string(),
        })
    }

    pub fn insert(&self, order_id: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.ids.insert(order_id.to_string()) {
            return;
        }
        inner.order.push_back(order_id.to_string());
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.ids.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Processes single deliveries: unwrap, pay, acknowledge.
pub struct DeliveryHandler {
    transport: Arc<dyn QueueTransport>,
    gate: PaymentGate,
    settled: SettledOrders,
}

impl DeliveryHandler {
    pub fn new(transport: Arc<dyn QueueTransport>, gate: PaymentGate, dedup_window: usize) -> Self {
        Self {
            transport,
            gate,
            settled: SettledOrders::new(dedup_window),
        }
    }

    pub fn settled(&self) -> &SettledOrders {
        &self.settled
    }

    /// Handles one delivery.
    ///
    /// 1. Unwrap the pub/sub envelope and decode the order. Failure: drop, no delete.
    /// 2. Skip payment for orders already settled in this process; just delete.
    ///    Leave the message alone if another delivery of the order is paying right now.
    /// 3. `pending → processing`, then run the payment through the gate.
    /// 4. Success: `completed`, delete. Failure: `failed`, no delete.
    ///
    /// Delete failures are logged, not retried.
    pub async fn handle(&self, message: QueueMessage) -> DeliveryOutcome {
        let mut order = match unwrap_order(&message.body) {
            Ok(order) => order,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "Dropping undecodable message");
                return DeliveryOutcome::Dropped(e.to_string());
            }
        };

        let claim = match self.settled.claim(&order.order_id) {
            Claim::Acquired(claim) => claim,
            Claim::Settled => {
                info!(
                    order_id = %order.order_id,
                    receive_count = message.receive_count,
                    "Order already settled, acknowledging redelivery"
                );
                return self
                    .acknowledge(&message, DeliveryOutcome::AlreadySettled)
                    .await;
            }
            Claim::InFlight => {
                info!(
                    order_id = %order.order_id,
                    receive_count = message.receive_count,
                    "Order is being paid by another delivery, leaving message"
                );
                return DeliveryOutcome::InFlight;
            }
        };

        if let Err(e) = order.begin_processing() {
            warn!(order_id = %order.order_id, error = %e, "Dropping order in unexpected status");
            return DeliveryOutcome::Dropped(e.to_string());
        }

        info!(order_id = %order.order_id, customer_id = order.customer_id, "Processing order");
        match self.gate.process(&order).await {
            Ok(()) => {
                settle(&mut order, OrderStatus::Completed);
                claim.settle();
                info!(order_id = %order.order_id, "Payment completed");
                self.acknowledge(&message, DeliveryOutcome::Completed).await
            }
            Err(e) => {
                settle(&mut order, OrderStatus::Failed);
                warn!(
                    order_id = %order.order_id,
                    error = %e,
                    "Payment failed, leaving message for redelivery"
                );
                DeliveryOutcome::PaymentFailed(e.to_string())
            }
        }
    }

    async fn acknowledge(&self, message: &QueueMessage, outcome: DeliveryOutcome) -> DeliveryOutcome {
        match self.transport.delete(&message.receipt_handle).await {
            Ok(()) => {
                debug!(receipt_handle = %message.receipt_handle, "Message deleted");
                outcome
            }
            Err(e) => {
                error!(
                    receipt_handle = %message.receipt_handle,
                    error = %e,
                    "Error deleting message from queue"
                );
                DeliveryOutcome::AckFailed(e.to_string())
            }
        }
    }
}

fn settle(order: &mut Order, status: OrderStatus) {
    if let Err(e) = order.advance(status) {
        warn!(order_id = %order.order_id, error = %e, "Status not updated");
    }
}

/// Long-lived consumer: one poll loop feeding `W` workers.
pub struct QueueConsumerPool {
    transport: Arc<dyn QueueTransport>,
    handler: Arc<DeliveryHandler>,
    config: ConsumerConfig,
}

impl QueueConsumerPool {
    pub fn new(transport: Arc<dyn QueueTransport>, gate: PaymentGate, config: ConsumerConfig) -> Self {
        let handler = Arc::new(DeliveryHandler::new(
            transport.clone(),
            gate,
            config.dedup_window,
        ));
        Self {
            transport,
            handler,
            config,
        }
    }

    /// Polls and processes until `shutdown` is cancelled, then drains the workers.
    pub async fn run(self, shutdown: CancellationToken) {
        let workers = self.config.workers.max(1);
        let (sender, receiver) = mpsc::channel(self.config.handoff_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        info!(
            workers,
            handoff_capacity = self.config.handoff_capacity,
            "Consumer pool started"
        );

        let handles: Vec<_> = (1..=workers)
            .map(|worker_id| {
                let receiver = receiver.clone();
                let handler = self.handler.clone();
                tokio::spawn(work(receiver, handler).instrument(info_span!("worker", worker_id)))
            })
            .collect();

        poll(self.transport.as_ref(), sender, &self.config, &shutdown).await;

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        info!("Consumer pool stopped");
    }
}

async fn poll(
    transport: &dyn QueueTransport,
    sender: mpsc::Sender<QueueMessage>,
    config: &ConsumerConfig,
    shutdown: &CancellationToken,
) {
    let options = config.receive_options();
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = transport.receive(options) => received,
        };

        let messages = match received {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    error = %e,
                    backoff_ms = config.error_backoff.as_millis() as u64,
                    "Error receiving messages"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.error_backoff) => continue,
                }
            }
        };

        if messages.is_empty() {
            continue;
        }
        debug!(count = messages.len(), "Dispatching batch");
        for message in messages {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                sent = sender.send(message) => {
                    if sent.is_err() {
                        warn!("Hand-off queue closed");
                        return;
                    }
                }
            }
        }
    }
    debug!("Poll loop stopped");
}

async fn work(
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueueMessage>>>,
    handler: Arc<DeliveryHandler>,
) {
    debug!("Worker started");
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(message) = next else {
            break;
        };
        handler.handle(message).await;
    }
    debug!("Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{encode_order, PubSubEnvelope};
    use crate::error::TransportError;
    use crate::mock::{MockQueue, ScriptedBackend};
    use crate::model::NewOrder;

    fn body(order_id: &str) -> String {
        let order = Order::admit(NewOrder {
            order_id: Some(order_id.into()),
            customer_id: 3,
            items: vec![],
        })
        .unwrap();
        PubSubEnvelope::notification("orders", "m", &encode_order(&order).unwrap())
            .to_json()
            .unwrap()
    }

    fn handler(queue: &MockQueue, backend: Arc<ScriptedBackend>) -> (DeliveryHandler, PaymentGate) {
        let gate = PaymentGate::with_backend(5, backend);
        (
            DeliveryHandler::new(Arc::new(queue.clone()), gate.clone(), 100),
            gate,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn success_deletes_exactly_once() {
        let queue = MockQueue::new();
        let (handler, gate) = handler(&queue, Arc::new(ScriptedBackend::new(Duration::from_secs(3))));

        let outcome = handler.handle(MockQueue::message("h-1", &body("order-1"))).await;

        assert_eq!(outcome, DeliveryOutcome::Completed);
        assert_eq!(queue.delete_count("h-1"), 1);
        assert_eq!(gate.stats().processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn payment_failure_is_not_deleted() {
        let queue = MockQueue::new();
        let backend = Arc::new(ScriptedBackend::new(Duration::from_secs(3)));
        backend.fail_order("order-bad");
        let (handler, gate) = handler(&queue, backend);

        let outcome = handler.handle(MockQueue::message("h-bad", &body("order-bad"))).await;

        assert!(matches!(outcome, DeliveryOutcome::PaymentFailed(_)));
        assert_eq!(queue.delete_count("h-bad"), 0);
        assert_eq!(gate.stats().failed, 1);
        assert!(!handler.settled().contains("order-bad"));
    }

    #[tokio::test]
    async fn malformed_bodies_are_dropped_without_delete() {
        let queue = MockQueue::new();
        let backend = Arc::new(ScriptedBackend::new(Duration::ZERO));
        let (handler, _gate) = handler(&queue, backend.clone());

        for (handle, raw) in [
            ("h-1", "definitely not json"),
            ("h-2", r#"{"Message": "not an order"}"#),
            ("h-3", r#"{"Message": "{\"order_id\":\"o\",\"customer_id\":1,\"status\":\"completed\"}"}"#),
        ] {
            let outcome = handler.handle(MockQueue::message(handle, raw)).await;
            assert!(matches!(outcome, DeliveryOutcome::Dropped(_)), "{handle}: {outcome:?}");
        }
        assert!(queue.deleted().is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivery_after_failed_delete_does_not_pay_twice() {
        let queue = MockQueue::new();
        queue.fail_delete("h-first");
        let backend = Arc::new(ScriptedBackend::new(Duration::from_secs(3)));
        let (handler, gate) = handler(&queue, backend.clone());

        let first = handler.handle(MockQueue::message("h-first", &body("order-9"))).await;
        assert!(matches!(first, DeliveryOutcome::AckFailed(_)));

        let second = handler.handle(MockQueue::message("h-second", &body("order-9"))).await;
        assert_eq!(second, DeliveryOutcome::AlreadySettled);
        assert_eq!(queue.delete_count("h-second"), 1);
        assert_eq!(backend.calls(), 1);
        assert_eq!(gate.stats().processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_order_is_retried_on_redelivery() {
        let queue = MockQueue::new();
        let backend = Arc::new(ScriptedBackend::new(Duration::from_secs(1)));
        backend.set_fail_all(true);
        let (handler, gate) = handler(&queue, backend.clone());

        handler.handle(MockQueue::message("h-1", &body("order-r"))).await;
        backend.set_fail_all(false);
        let outcome = handler.handle(MockQueue::message("h-2", &body("order-r"))).await;

        assert_eq!(outcome, DeliveryOutcome::Completed);
        assert_eq!(queue.deleted(), vec!["h-2".to_string()]);
        assert_eq!(gate.stats().processed, 1);
        assert_eq!(gate.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_copies_of_one_order_pay_once() {
        let queue = MockQueue::new();
        let backend = Arc::new(ScriptedBackend::new(Duration::from_secs(3)));
        let (handler, gate) = handler(&queue, backend.clone());

        let (old, new) = tokio::join!(
            handler.handle(MockQueue::message("h-old", &body("order-dup"))),
            handler.handle(MockQueue::message("h-new", &body("order-dup"))),
        );

        assert_eq!(old, DeliveryOutcome::Completed);
        assert_eq!(new, DeliveryOutcome::InFlight);
        assert_eq!(backend.calls(), 1);
        assert_eq!(gate.stats().processed, 1);
        assert_eq!(queue.deleted(), vec!["h-old".to_string()]);

        // The kept copy comes back once the first payment settled.
        let again = handler.handle(MockQueue::message("h-new", &body("order-dup"))).await;
        assert_eq!(again, DeliveryOutcome::AlreadySettled);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn claim_is_released_after_failed_payment() {
        let queue = MockQueue::new();
        let backend = Arc::new(ScriptedBackend::new(Duration::from_secs(1)));
        backend.fail_order("order-f");
        let (handler, _gate) = handler(&queue, backend.clone());

        handler.handle(MockQueue::message("h-1", &body("order-f"))).await;

        assert!(matches!(
            handler.settled().claim("order-f"),
            Claim::Acquired(_)
        ));
    }

    #[test]
    fn settled_orders_forget_oldest() {
        let settled = SettledOrders::new(2);
        settled.insert("a");
        settled.insert("b");
        settled.insert("b");
        settled.insert("c");
        assert!(!settled.contains("a"));
        assert!(settled.contains("b"));
        assert!(settled.contains("c"));
        assert_eq!(settled.len(), 2);

        let disabled = SettledOrders::new(0);
        disabled.insert("a");
        assert!(disabled.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_back_off_and_keep_polling() {
        let queue = MockQueue::new();
        queue
            .expect_receive()
            .return_err(TransportError::Receive("throttled".into()));
        queue
            .expect_receive()
            .return_err(TransportError::Receive("throttled".into()));
        queue
            .expect_receive()
            .return_ok(vec![MockQueue::message("h-1", &body("order-1"))]);

        let backend = Arc::new(ScriptedBackend::new(Duration::from_secs(3)));
        let gate = PaymentGate::with_backend(5, backend);
        let config = ConsumerConfig {
            error_backoff: Duration::from_secs(5),
            ..ConsumerConfig::default()
        };
        let pool = QueueConsumerPool::new(Arc::new(queue.clone()), gate.clone(), config);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(pool.run(shutdown.clone()));

        // Two backoffs (10s) plus one 3s payment.
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(queue.delete_count("h-1"), 1);
        assert_eq!(gate.stats().processed, 1);
        assert!(queue.receive_calls() >= 4);

        shutdown.cancel();
        running.await.unwrap();
        queue.verify();
    }

    #[tokio::test(start_paused = true)]
    async fn full_handoff_queue_stalls_polling() {
        let queue = MockQueue::new();
        for n in 1..=5 {
            queue.expect_receive().return_ok(vec![MockQueue::message(
                &format!("h-{n}"),
                &body(&format!("order-{n}")),
            )]);
        }
        let gate = PaymentGate::with_backend(5, Arc::new(ScriptedBackend::new(Duration::from_secs(10))));
        let config = ConsumerConfig {
            workers: 1,
            handoff_capacity: 1,
            ..ConsumerConfig::default()
        };
        let pool = QueueConsumerPool::new(Arc::new(queue.clone()), gate.clone(), config);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(pool.run(shutdown.clone()));

        // One order paying, one waiting in the hand-off queue, one blocked in send.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(queue.receive_calls() <= 3, "polled {} times", queue.receive_calls());
        assert_eq!(gate.stats().processed, 0);

        // Each finished payment frees exactly one slot.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.receive_calls() <= 4, "polled {} times", queue.receive_calls());
        assert_eq!(gate.stats().processed, 1);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(gate.stats().processed, 5);
        assert_eq!(queue.deleted().len(), 5);

        shutdown.cancel();
        running.await.unwrap();
        queue.verify();
    }
}
