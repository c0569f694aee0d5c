//! # System Lifecycle & Orchestration
//!
//! Individual components are simple; wiring them together is where the complexity
//! lives. [`OrderSystem`] is the one place that builds, connects, starts and stops them.
//!
//! ## Wiring
//!
//! ```text
//!                    ┌──────────── PaymentGate (one per process) ────────────┐
//!                    │                                                        │
//! HTTP ─▶ AppState ──┼─▶ SyncAdmission                                        │
//!                    └─▶ AsyncPublisher ─▶ InMemoryBroker ─▶ InMemoryQueue ─▶ QueueConsumerPool
//! ```
//!
//! Which pieces run depends on the [`ServiceMode`](crate::config::ServiceMode).
//! `combined` wires everything above around one gate. `api` keeps only the sync path,
//! since the in-memory queue is invisible to other processes; `worker` is refused for
//! the same reason. `event` mode bypasses [`OrderSystem`] entirely and drives a
//! `SingleEventConsumer` with its own gate.
//!
//! ## Graceful Shutdown
//!
//! 1. **Cancel** - the shared `CancellationToken` fires (Ctrl-C or [`OrderSystem::shutdown`])
//! 2. **Stop accepting** - the HTTP server finishes in-flight requests and stops
//! 3. **Stop polling** - the consumer pool's poll loop exits, closing the hand-off queue
//! 4. **Drain** - workers finish what was already handed to them
//! 5. **Await** - background tasks are awaited, bounded by `SHUTDOWN_TIMEOUT_SECS`
//!
//! Messages received but not processed before the deadline are redelivered by the queue
//! once their visibility timeout expires.

pub mod order_system;

pub use order_system::*;
