use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use order_pipeline::error::TransportError;
use order_pipeline::mock::{MockPublisher, ScriptedBackend};
use order_pipeline::{AsyncPublisher, PaymentGate};
use order_service::api::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SERVICE_TIME: Duration = Duration::from_secs(3);

fn app(capacity: usize, backend: Arc<ScriptedBackend>, publisher: MockPublisher) -> Router {
    let gate = PaymentGate::with_backend(capacity, backend);
    let publisher = AsyncPublisher::new(Arc::new(publisher), "orders");
    router(AppState::new(gate, publisher))
}

fn default_app() -> Router {
    app(
        5,
        Arc::new(ScriptedBackend::new(SERVICE_TIME)),
        MockPublisher::new(),
    )
}

fn order(order_id: Option<&str>) -> Value {
    json!({
        "order_id": order_id,
        "customer_id": 17,
        "items": [{ "product_id": "sku-1", "quantity": 2, "price": 4.25 }]
    })
}

async fn send(app: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_healthy() {
    let (status, body) = send(default_app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test(start_paused = true)]
async fn sync_order_completes_after_payment() {
    let (status, body) = send(
        default_app(),
        "POST",
        "/orders/sync",
        Some(order(None).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["customer_id"], 17);
    assert_eq!(body["processing_ms"], 3000);
    assert_eq!(body["message"], "order processed successfully");
    assert!(body["order_id"].as_str().unwrap().starts_with("order-"));
}

#[tokio::test(start_paused = true)]
async fn sync_requests_beyond_capacity_wait_for_a_token() {
    let app = app(
        2,
        Arc::new(ScriptedBackend::new(SERVICE_TIME)),
        MockPublisher::new(),
    );

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                send(app, "POST", "/orders/sync", Some(order(None).to_string())).await
            })
        })
        .collect();

    let mut processing_ms = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        processing_ms.push(body["processing_ms"].as_u64().unwrap());
    }
    processing_ms.sort();
    assert_eq!(processing_ms, vec![3000, 3000, 6000]);
}

#[tokio::test(start_paused = true)]
async fn sync_payment_failure_returns_500_with_elapsed() {
    let backend = Arc::new(ScriptedBackend::new(SERVICE_TIME));
    backend.fail_order("order-declined");
    let app = app(5, backend, MockPublisher::new());

    let (status, body) = send(
        app,
        "POST",
        "/orders/sync",
        Some(order(Some("order-declined")).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "payment processing failed");
    assert_eq!(body["order_id"], "order-declined");
    assert_eq!(body["processing_ms"], 3000);
}

#[tokio::test]
async fn malformed_and_invalid_orders_are_rejected() {
    let backend = Arc::new(ScriptedBackend::new(Duration::ZERO));
    let app = app(5, backend.clone(), MockPublisher::new());
    let invalid = json!({
        "customer_id": 1,
        "items": [{ "product_id": "sku-1", "quantity": 0, "price": 1.0 }]
    });

    for uri in ["/orders/sync", "/orders/async"] {
        let (status, body) = send(app.clone(), "POST", uri, Some("{ not json".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "validation_error");

        let (status, body) = send(app.clone(), "POST", uri, Some(invalid.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "validation_error");
    }
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn async_order_is_accepted_without_payment() {
    let backend = Arc::new(ScriptedBackend::new(SERVICE_TIME));
    let publisher = MockPublisher::new();
    let app = app(5, backend.clone(), publisher.clone());

    let (status, body) = send(
        app,
        "POST",
        "/orders/async",
        Some(order(Some("order-a1")).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["order_id"], "order-a1");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["message"], "order received and queued for processing");
    assert!(body["timestamp"].is_string());
    assert_eq!(publisher.published().len(), 1);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn async_publish_failure_returns_500() {
    let publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .return_err(TransportError::Publish("broker down".into()));
    let app = app(
        5,
        Arc::new(ScriptedBackend::new(Duration::ZERO)),
        publisher.clone(),
    );

    let (status, body) = send(app, "POST", "/orders/async", Some(order(None).to_string())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "failed to publish order");
    publisher.verify();
}

#[tokio::test]
async fn async_without_publisher_returns_503() {
    let backend = Arc::new(ScriptedBackend::new(Duration::ZERO));
    let app = router(AppState::sync_only(PaymentGate::with_backend(5, backend.clone())));

    let (status, body) = send(app, "POST", "/orders/async", Some(order(None).to_string())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "async processing unavailable");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stats_count_successes_and_failures() {
    let backend = Arc::new(ScriptedBackend::new(SERVICE_TIME));
    backend.fail_order("order-bad");
    let app = app(5, backend, MockPublisher::new());

    for id in ["order-1", "order-2", "order-3", "order-bad"] {
        send(
            app.clone(),
            "POST",
            "/orders/sync",
            Some(order(Some(id)).to_string()),
        )
        .await;
    }

    let (status, body) = send(app, "GET", "/orders/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "processed": 3, "failed": 1, "max_concurrent": 5 })
    );
}
