use super::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use order_pipeline::NewOrder;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct SyncOrderResponse {
    pub order_id: String,
    pub status: String,
    pub customer_id: i64,
    pub processing_ms: u64,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AsyncOrderResponse {
    pub order_id: String,
    pub status: String,
    pub message: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub processed: u64,
    pub failed: u64,
    pub max_concurrent: usize,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Processes the payment before answering; waits for a free token if needed.
pub async fn create_sync(
    State(state): State<AppState>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> ApiResult<Json<SyncOrderResponse>> {
    let Json(request) = payload?;
    debug!(?request, "create_sync called");

    let receipt = state.sync.submit(request).await?;
    Ok(Json(SyncOrderResponse {
        order_id: receipt.order.order_id,
        status: receipt.order.status.to_string(),
        customer_id: receipt.order.customer_id,
        processing_ms: receipt.elapsed.as_millis() as u64,
        message: "order processed successfully",
    }))
}

/// Queues the order and answers `202 Accepted` without waiting for payment.
pub async fn create_async(
    State(state): State<AppState>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AsyncOrderResponse>)> {
    let Json(request) = payload?;
    debug!(?request, "create_async called");

    let publisher = state.publisher.as_ref().ok_or_else(|| {
        ApiError::Unavailable("this instance does not process queued orders".into())
    })?;
    let accepted = publisher.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AsyncOrderResponse {
            order_id: accepted.order.order_id,
            status: accepted.order.status.to_string(),
            message: "order received and queued for processing",
            timestamp: accepted.order.created_at.to_rfc3339(),
        }),
    ))
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.gate.stats();
    Json(StatsResponse {
        processed: stats.processed,
        failed: stats.failed,
        max_concurrent: state.gate.capacity(),
    })
}
