//! # Order Service
//!
//! Entry point. The process role comes from `SERVICE_MODE` (see [`order_service::config`]):
//!
//! - `combined` / `api`: start an [`OrderSystem`] and serve HTTP until Ctrl-C. `worker`
//!   is rejected at startup because the in-memory queue cannot be shared.
//! - `event`: read one serverless event document from stdin, process it, exit. A
//!   failed invocation exits non-zero so the platform redelivers the batch.
//!
//! ```bash
//! SERVICE_MODE=combined NUM_WORKERS=5 cargo run -p order-service
//! echo '{"Records":[...]}' | SERVICE_MODE=event cargo run -p order-service
//! ```

use anyhow::Context;
use order_pipeline::tracing::setup_tracing;
use order_pipeline::{PaymentGate, SingleEventConsumer};
use order_service::config::{ServiceConfig, ServiceMode};
use order_service::lifecycle::OrderSystem;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    setup_tracing();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    info!(mode = %config.mode, "Starting order service");

    match config.mode {
        ServiceMode::Event => run_event(&config).await,
        _ => run_service(&config).await,
    }
}

async fn run_service(config: &ServiceConfig) -> anyhow::Result<()> {
    let system = OrderSystem::start(config).context("failed to wire order system")?;

    let shutdown = system.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        shutdown.cancel();
    });

    let listener = TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    system.serve(listener).await.context("HTTP server failed")?;

    system.shutdown().await;
    info!("Order service stopped");
    Ok(())
}

async fn run_event(config: &ServiceConfig) -> anyhow::Result<()> {
    let mut event = String::new();
    tokio::io::stdin()
        .read_to_string(&mut event)
        .await
        .context("failed to read event from stdin")?;

    let consumer = SingleEventConsumer::new(PaymentGate::new(&config.gate));
    let report = consumer
        .handle_json(&event)
        .await
        .context("event invocation failed")?;

    info!(
        completed = report.completed,
        skipped = report.skipped,
        "Event processed"
    );
    Ok(())
}
