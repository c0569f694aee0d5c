//! # HTTP Surface
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `GET` | `/health` | liveness |
//! | `POST` | `/orders/sync` | pay inside the request, `200` when completed |
//! | `POST` | `/orders/async` | publish and return `202`; `503` without a publisher |
//! | `GET` | `/orders/stats` | gate counters and capacity |
//!
//! Every handler works on the shared [`AppState`]; there is no global state, so tests
//! build a router around their own gate and publisher.

pub mod orders;

use axum::{
    routing::{get, post},
    Router,
};
use order_pipeline::{AsyncPublisher, PaymentGate, SyncAdmission};
use tower_http::trace::TraceLayer;

#[derive(Clone, Debug)]
pub struct AppState {
    pub sync: SyncAdmission,
    pub publisher: Option<AsyncPublisher>,
    pub gate: PaymentGate,
}

impl AppState {
    pub fn new(gate: PaymentGate, publisher: AsyncPublisher) -> Self {
        Self {
            sync: SyncAdmission::new(gate.clone()),
            publisher: Some(publisher),
            gate,
        }
    }

    /// State for an instance that only pays synchronously.
    pub fn sync_only(gate: PaymentGate) -> Self {
        Self {
            sync: SyncAdmission::new(gate.clone()),
            publisher: None,
            gate,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(orders::health))
        .route("/orders/sync", post(orders::create_sync))
        .route("/orders/async", post(orders::create_async))
        .route("/orders/stats", get(orders::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
