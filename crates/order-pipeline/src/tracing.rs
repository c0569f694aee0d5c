//! # Observability & Tracing
//!
//! [`setup_tracing`] installs one compact `tracing-subscriber` formatter for the whole
//! process. Module paths are hidden (`with_target(false)`); the structured fields carry
//! the context instead.
//!
//! ## Levels
//!
//! | Level | What you see |
//! |-------|--------------|
//! | `info` (default) | startup, per-order outcomes, shutdown |
//! | `debug` | token acquisition, batches, deletes, payloads |
//! | `warn` | dropped deliveries, failed payments |
//! | `error` | transport failures |
//!
//! ```bash
//! RUST_LOG=debug cargo run -p order-service
//! RUST_LOG=order_pipeline=debug,tower_http=info cargo run -p order-service
//! ```
//!
//! ## Spans
//!
//! Request-path calls run inside `submit{order_id=..}` and every payment inside
//! `process{order_id=..}`. Consumer workers carry `worker{worker_id=..}`, so a line like
//!
//! ```text
//! INFO worker{worker_id=3}:process{order_id="order-1f0c.."}: Payment completed
//! ```
//!
//! tells you which worker handled which order.

use tracing_subscriber::EnvFilter;

pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
