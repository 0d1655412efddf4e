//! Integration tests for the HTTP adapter.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::AppState;
use api::config::Config;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use common::AggregateId;
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state(config: &Config) -> (Router, Arc<AppState<InMemoryEventStore>>) {
    let state = api::create_default_state(InMemoryEventStore::new(), config);
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn setup() -> Router {
    setup_with_state(&Config::default()).0
}

async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn create_order(app: &Router, price: f64) -> String {
    let response = post_json(
        app,
        "/orders",
        &json!({ "userId": 1, "items": [{ "productId": 1, "quantity": 2, "price": price }] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["orderId"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn wait_for_status(app: &Router, order_id: &str, status: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let order = body_json(get(app, &format!("/orders/{order_id}")).await).await;
            if order["status"] == status {
                return order;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "UP");
    assert_eq!(json["service"], "order-service");
    assert_eq!(json["paymentBreaker"], "closed");
}

#[tokio::test]
async fn test_create_order() {
    let app = setup();

    let response = post_json(
        &app,
        "/orders",
        &json!({ "userId": 1, "items": [{ "productId": 1, "quantity": 2, "price": 10.00 }] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["totalAmount"], 20.0);
    assert!(json["orderId"].as_str().unwrap().parse::<AggregateId>().is_ok());
}

#[tokio::test]
async fn test_create_and_get_order() {
    let app = setup();
    let order_id = create_order(&app, 10.0).await;

    let response = get(&app, &format!("/orders/{order_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = body_json(response).await;
    assert_eq!(order["id"], order_id);
    assert_eq!(order["userId"], 1);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["totalAmount"], 20.0);
    assert_eq!(order["version"], 1);
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_validation_errors_are_listed() {
    let app = setup();

    let response = post_json(
        &app,
        "/orders",
        &json!({
            "userId": 1,
            "items": [
                { "productId": 1, "quantity": 0, "price": 10.0 },
                { "productId": 2, "quantity": 1, "price": -5.0 }
            ]
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    let paths: Vec<_> = json["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["items[0].quantity", "items[1].price"]);
    assert_eq!(json["errors"][0]["msg"], "Quantity must be at least 1");
}

#[tokio::test]
async fn test_empty_items_rejected() {
    let app = setup();

    let response = post_json(&app, "/orders", &json!({ "userId": 1, "items": [] })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["errors"][0]["path"], "items");
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = setup();

    let response = post_json(&app, "/orders", &json!({ "userId": 1, "items": "lots" })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["errors"].is_array());
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let app = setup();

    let response = get(&app, &format!("/orders/{}", AggregateId::new())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&app, "/orders/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_store_outage_is_unavailable() {
    let (app, state) = setup_with_state(&Config::default());
    state.store.set_fail_on_append(true);

    let response = post_json(
        &app,
        "/orders",
        &json!({ "userId": 1, "items": [{ "productId": 1, "quantity": 1, "price": 1.0 }] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(state.store.event_count().await, 0);
}

#[tokio::test]
async fn test_order_paid_end_to_end() {
    let (app, state) = setup_with_state(&Config::default());
    let _workers = state.spawn_payment_simulation(Duration::from_millis(10));

    let order_id = create_order(&app, 10.0).await;
    let order = wait_for_status(&app, &order_id, "paid").await;
    assert!(order["transactionId"].as_str().unwrap().starts_with("tx-"));

    let events = body_json(get(&app, &format!("/orders/{order_id}/events")).await).await;
    let types: Vec<_> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(types, vec!["Created", "Paid"]);

    let status = body_json(get(&app, &format!("/orders/{order_id}/payment-status")).await).await;
    assert_eq!(status["status"], "processed");
    assert_eq!(status["isFallback"], false);
}

#[tokio::test]
async fn test_order_cancelled_end_to_end() {
    let (app, state) = setup_with_state(&Config::default());
    let _workers = state.spawn_payment_simulation(Duration::from_millis(10));

    let response = post_json(
        &app,
        "/orders",
        &json!({ "userId": 2, "items": [{ "productId": 1, "quantity": 1, "price": 10.99 }] }),
    )
    .await;
    let order_id = body_json(response).await["orderId"]
        .as_str()
        .unwrap()
        .to_string();
    let order = wait_for_status(&app, &order_id, "cancelled").await;

    assert_eq!(order["totalAmount"], 10.99);
    assert_eq!(order["cancellationReason"], "Payment failed");
}

#[tokio::test]
async fn test_payment_status_fallback() {
    let mut config = Config::default();
    config.breaker.call_timeout = Duration::from_millis(50);
    let (app, state) = setup_with_state(&config);
    state.payments.set_delay(Duration::from_millis(500));

    let response = get(&app, &format!("/orders/{}/payment-status", AggregateId::new())).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unknown");
    assert_eq!(json["transactionId"], "N/A");
    assert_eq!(json["isFallback"], true);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    create_order(&app, 3.0).await;

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));
}

#[tokio::test]
async fn test_list_user_orders() {
    let app = setup();
    let first = create_order(&app, 10.0).await;
    let second = create_order(&app, 4.0).await;
    post_json(
        &app,
        "/orders",
        &json!({ "userId": 2, "items": [{ "productId": 1, "quantity": 1, "price": 1.0 }] }),
    )
    .await;

    let response = get(&app, "/users/1/orders").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let ids: Vec<_> = json["orders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec![second, first]);
    assert_eq!(json["orders"][0]["totalAmount"], 8.0);
    assert_eq!(json["orders"][0]["status"], "pending");
}

#[tokio::test]
async fn test_list_user_orders_empty_and_invalid() {
    let app = setup();

    let json = body_json(get(&app, "/users/42/orders").await).await;
    assert_eq!(json["orders"], json!([]));

    let response = get(&app, "/users/abc/orders").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
