//! # Payment Gate
//!
//! The single shared bottleneck of the system: a capacity-bounded executor in front of
//! a slow payment backend.
//!
//! ## Admission Control
//!
//! The gate owns a pool of `N` [`CapacityToken`]s (a Tokio [`Semaphore`]). Every call to
//! [`PaymentGate::process`] takes one token before contacting the backend and gives it
//! back afterwards. When all tokens are out, callers are suspended until one returns;
//! there is no timeout and no ordering promise beyond what the semaphore provides.
//!
//! Tokens are RAII guards, so they are released on every exit path: success, payment
//! failure, a panicking backend or a dropped future.
//!
//! With the default backend each call holds its token for a fixed service time, so the
//! sustained ceiling is `N / service_time` orders per second.
//!
//! ## Statistics
//!
//! Outcomes are counted in [`ProcessingStats`] behind a plain mutex. The lock only ever
//! guards two integer updates; the token is already released when it is taken.

use crate::error::PaymentError;
use crate::model::Order;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, instrument, warn};

pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_SERVICE_TIME: Duration = Duration::from_secs(3);

/// Sizing of a [`PaymentGate`] backed by the simulated backend.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Number of payment calls allowed in flight at once.
    pub capacity: usize,
    /// How long the simulated verification round trip takes.
    pub service_time: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            service_time: DEFAULT_SERVICE_TIME,
        }
    }
}

/// The downstream payment step guarded by the gate.
///
/// The gate knows nothing about how verification works; it only bounds how many
/// verifications run at once. Tests swap in
/// [`ScriptedBackend`](crate::mock::ScriptedBackend) to inject failures.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    async fn verify(&self, order: &Order) -> Result<(), PaymentError>;
}

/// Stand-in for an external payment verification service.
///
/// Always succeeds after a fixed delay that does not depend on the order.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    service_time: Duration,
}

impl SimulatedBackend {
    pub fn new(service_time: Duration) -> Self {
        Self { service_time }
    }
}

#[async_trait]
impl PaymentBackend for SimulatedBackend {
    async fn verify(&self, order: &Order) -> Result<(), PaymentError> {
        debug!(order_id = %order.order_id, customer_id = order.customer_id, "Verifying payment");
        tokio::time::sleep(self.service_time).await;
        Ok(())
    }
}

/// Counters of payment outcomes. Only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub processed: u64,
    pub failed: u64,
}

/// One unit of permission to call the payment backend.
///
/// Returned to the pool when dropped.
#[derive(Debug)]
pub struct CapacityToken<'a> {
    _permit: SemaphorePermit<'a>,
}

/// Capacity-bounded payment executor.
///
/// Cheap to clone; clones share the same token pool and counters. Construct one per
/// deployment unit and hand it to every component that takes payments.
#[derive(Clone)]
pub struct PaymentGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    permits: Semaphore,
    capacity: usize,
    backend: Arc<dyn PaymentBackend>,
    stats: Mutex<ProcessingStats>,
}

impl PaymentGate {
    /// A gate in front of the [`SimulatedBackend`].
    pub fn new(config: &GateConfig) -> Self {
        Self::with_backend(
            config.capacity,
            Arc::new(SimulatedBackend::new(config.service_time)),
        )
    }

    /// A gate in front of an arbitrary backend.
    ///
    /// A capacity of zero would suspend every caller forever, so it is raised to one.
    pub fn with_backend(capacity: usize, backend: Arc<dyn PaymentBackend>) -> Self {
        let capacity = if capacity == 0 {
            warn!("Payment gate capacity of 0 raised to 1");
            1
        } else {
            capacity
        };
        Self {
            inner: Arc::new(GateInner {
                permits: Semaphore::new(capacity),
                capacity,
                backend,
                stats: Mutex::new(ProcessingStats::default()),
            }),
        }
    }

    /// Configured number of tokens.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Tokens currently held by callers.
    pub fn in_flight(&self) -> usize {
        self.inner.capacity - self.inner.permits.available_permits()
    }

    /// Snapshot of the outcome counters.
    pub fn stats(&self) -> ProcessingStats {
        *self
            .inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a free token.
    pub async fn acquire(&self) -> Result<CapacityToken<'_>, PaymentError> {
        let permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| PaymentError::GateClosed)?;
        Ok(CapacityToken { _permit: permit })
    }

    /// Runs one payment through the backend under a capacity token.
    ///
    /// Suspends while the gate is at capacity. The outcome is counted once the token
    /// has been released.
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    pub async fn process(&self, order: &Order) -> Result<(), PaymentError> {
        let token = self.acquire().await?;
        debug!(in_flight = self.in_flight(), "Capacity token acquired");

        let outcome = self.inner.backend.verify(order).await;
        drop(token);

        self.record(&outcome);
        outcome
    }

    fn record(&self, outcome: &Result<(), PaymentError>) {
        let mut stats = self
            .inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(()) => stats.processed += 1,
            Err(_) => stats.failed += 1,
        }
    }
}

impl std::fmt::Debug for PaymentGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGate")
            .field("capacity", &self.inner.capacity)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
