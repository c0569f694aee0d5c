//! # Order Pipeline
//!
//! The concurrency core of the order service: a capacity-bounded payment step and the
//! three ways orders reach it.
//!
//! ## Architecture Overview
//!
//! ```text
//!  SyncAdmission ───────────────────────────────────────────────┐
//!                                                               ▼
//!  AsyncPublisher ─▶ Publisher ─▶ QueueTransport ─▶ QueueConsumerPool ─▶ PaymentGate ─▶ PaymentBackend
//!                                                               ▲
//!  platform event ─▶ SingleEventConsumer ───────────────────────┘
//! ```
//!
//! 1. **Gate** ([`PaymentGate`]): `N` capacity tokens in front of a slow backend. This is
//!    the system's throughput ceiling, `N / service_time` orders per second.
//! 2. **Request path** ([`SyncAdmission`], [`AsyncPublisher`]): either pay inside the
//!    request, or publish and return immediately.
//! 3. **Consumers** ([`QueueConsumerPool`], [`SingleEventConsumer`]): pull from a queue
//!    with a fixed worker pool, or handle one platform-delivered batch.
//!
//! The gate is an explicit value. Construct one per deployment unit and pass clones to
//! everything that takes payments; tests build isolated gates with tiny capacities.
//!
//! ## Delivery Guarantees
//!
//! At-least-once. A queue message is acknowledged only after its order's payment
//! completed; everything else is redelivered by the transport once its visibility
//! timeout runs out. See [`consumer`] for how redeliveries of settled orders are
//! recognised.
//!
//! ## Seams
//!
//! | Trait | Production | Tests |
//! |-------|------------|-------|
//! | [`PaymentBackend`] | [`SimulatedBackend`] | [`mock::ScriptedBackend`] |
//! | [`Publisher`] | [`InMemoryBroker`] | [`mock::MockPublisher`] |
//! | [`QueueTransport`] | [`InMemoryQueue`] | [`mock::MockQueue`] |
//!
//! ## Quick Start
//!
//! ```rust
//! use order_pipeline::{
//!     AsyncPublisher, ConsumerConfig, GateConfig, InMemoryBroker, InMemoryQueue, NewOrder,
//!     PaymentGate, QueueConsumerPool,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = InMemoryBroker::new();
//!     broker.create_topic("orders");
//!     let queue = InMemoryQueue::new("orders-queue");
//!     broker.subscribe("orders", &queue).unwrap();
//!
//!     let gate = PaymentGate::new(&GateConfig {
//!         capacity: 2,
//!         service_time: Duration::from_millis(10),
//!     });
//!     let pool = QueueConsumerPool::new(
//!         Arc::new(queue.clone()),
//!         gate.clone(),
//!         ConsumerConfig {
//!             poll_wait: Duration::from_millis(50),
//!             ..ConsumerConfig::default()
//!         },
//!     );
//!     let shutdown = CancellationToken::new();
//!     let consumer = tokio::spawn(pool.run(shutdown.clone()));
//!
//!     let publisher = AsyncPublisher::new(Arc::new(broker), "orders");
//!     let accepted = publisher
//!         .submit(NewOrder { order_id: None, customer_id: 1, items: vec![] })
//!         .await
//!         .unwrap();
//!     println!("queued {}", accepted.order.order_id);
//!
//!     while !queue.is_empty() {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!     }
//!     shutdown.cancel();
//!     consumer.await.unwrap();
//!     assert_eq!(gate.stats().processed, 1);
//! }
//! ```

pub mod admission;
pub mod broker;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod mock;
pub mod model;
pub mod serverless;
pub mod tracing;
pub mod transport;

// Re-export core types for convenience
pub use admission::{Accepted, AsyncPublisher, SyncAdmission, SyncReceipt};
pub use broker::{InMemoryBroker, InMemoryQueue};
pub use consumer::{ConsumerConfig, DeliveryHandler, DeliveryOutcome, QueueConsumerPool};
pub use error::{
    AdmissionError, ConsumerError, EnvelopeError, PaymentError, StatusError, TransportError,
    ValidationError,
};
pub use gate::{GateConfig, PaymentBackend, PaymentGate, ProcessingStats, SimulatedBackend};
pub use model::{Item, NewOrder, Order, OrderStatus};
pub use serverless::{InvocationReport, SingleEventConsumer, SnsEvent};
pub use transport::{Publisher, QueueMessage, QueueTransport, ReceiveOptions};
