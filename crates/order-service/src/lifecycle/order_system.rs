use crate::api::{self, AppState};
use crate::config::{ServiceConfig, ServiceMode};
use axum::Router;
use order_pipeline::{
    AsyncPublisher, InMemoryBroker, InMemoryQueue, PaymentGate, QueueConsumerPool,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("{0} mode needs a queue shared between processes; the in-memory transport only works in combined mode")]
    NeedsSharedQueue(ServiceMode),

    #[error("{0} mode handles a single event and has no long-running system")]
    NotAService(ServiceMode),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The running service: shared gate, in-memory transport, HTTP state and background
/// consumer tasks.
pub struct OrderSystem {
    pub gate: PaymentGate,
    /// Present only when this process both publishes and consumes.
    pub queue: Option<InMemoryQueue>,
    pub state: AppState,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    handles: Vec<JoinHandle<()>>,
}

impl OrderSystem {
    /// Builds every component and starts the consumer pool if the mode asks for it.
    ///
    /// The in-memory queue is private to this process, so only `combined` mode wires it.
    /// `api` mode serves the sync path and refuses async orders; `worker` mode is refused.
    pub fn start(config: &ServiceConfig) -> Result<Self, StartError> {
        match config.mode {
            ServiceMode::Combined | ServiceMode::Api => {}
            ServiceMode::Worker => return Err(StartError::NeedsSharedQueue(config.mode)),
            ServiceMode::Event => return Err(StartError::NotAService(config.mode)),
        }

        let gate = PaymentGate::new(&config.gate);
        let shutdown = CancellationToken::new();
        let mut handles = Vec::new();

        let (state, queue) = if config.mode.consumes_queue() {
            let broker = InMemoryBroker::new();
            broker.create_topic(&config.topic);
            let queue = InMemoryQueue::new(format!("{}-queue", config.topic));
            broker.subscribe(&config.topic, &queue)?;

            let pool = QueueConsumerPool::new(
                Arc::new(queue.clone()),
                gate.clone(),
                config.consumer.clone(),
            );
            let span = tracing::info_span!("consumer", queue = %queue.name());
            handles.push(tokio::spawn(
                pool.run(shutdown.child_token()).instrument(span),
            ));

            let publisher = AsyncPublisher::new(Arc::new(broker), config.topic.clone());
            (AppState::new(gate.clone(), publisher), Some(queue))
        } else {
            (AppState::sync_only(gate.clone()), None)
        };

        info!(
            mode = %config.mode,
            capacity = gate.capacity(),
            workers = config.consumer.workers,
            topic = %config.topic,
            "Order system started"
        );

        Ok(Self {
            gate,
            queue,
            state,
            shutdown,
            shutdown_timeout: config.shutdown_timeout,
            handles,
        })
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Token that stops the whole system when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves HTTP on `listener` until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "HTTP server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await
    }

    /// Stops polling and waits for background tasks, up to the shutdown timeout.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        for handle in self.handles {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Background task failed"),
                Err(_) => warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Background task did not stop in time"
                ),
            }
        }

        let stats = self.gate.stats();
        info!(
            processed = stats.processed,
            failed = stats.failed,
            queued = self.queue.as_ref().map_or(0, InMemoryQueue::len),
            "Order system stopped"
        );
    }
}
