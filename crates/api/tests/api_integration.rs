//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::ProductId;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup_with_state() -> (axum::Router, Arc<AppState<InMemoryOrderStore>>) {
    let state = api::create_default_state(InMemoryOrderStore::new(), &Config::default());
    state
        .ledger
        .set_stock(&ProductId::new("SKU-001"), 10)
        .await
        .unwrap();
    state
        .ledger
        .set_stock(&ProductId::new("SKU-002"), 1)
        .await
        .unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn setup() -> axum::Router {
    setup_with_state().await.0
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn checkout_body(product_id: &str, quantity: i64) -> serde_json::Value {
    serde_json::json!({
        "line_items": [{
            "product_id": product_id,
            "quantity": quantity,
            "unit_price_cents": 1250
        }]
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["in_flight"], 0);
}

#[tokio::test]
async fn test_checkout_and_wait_completes() {
    let (app, state) = setup_with_state().await;

    let (status, json) = send(
        &app,
        "POST",
        "/checkout?wait=true",
        Some(checkout_body("SKU-001", 3)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "COMPLETED");
    assert_eq!(json["status"], "Completed");
    assert!(json.get("reason").is_none());

    let level = state
        .ledger
        .level(&ProductId::new("SKU-001"))
        .await
        .unwrap();
    assert_eq!(level.committed, 3);
    assert_eq!(level.available, 7);
}

#[tokio::test]
async fn test_checkout_is_accepted_then_finishes() {
    let (app, state) = setup_with_state().await;

    let (status, json) = send(&app, "POST", "/checkout", Some(checkout_body("SKU-001", 1))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["result"], "ACCEPTED");

    let order_id = json["order_id"].as_str().unwrap().to_string();
    state
        .coordinator
        .wait_for_terminal(
            common::OrderId::parse(&order_id).unwrap(),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();

    let (status, json) = send(&app, "GET", &format!("/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order_id"], order_id.as_str());
    assert_eq!(json["result"], "COMPLETED");
    assert_eq!(json["total_cents"], 1250);
    assert_eq!(json["line_items"][0]["product_id"], "SKU-001");
    assert!(json["steps"].as_array().unwrap().len() >= 4);
    assert_eq!(json["steps"][0]["step"], "reserve_inventory");
    assert_eq!(json["steps"][0]["outcome"]["kind"], "succeeded");
}

#[tokio::test]
async fn test_checkout_insufficient_stock_is_cancelled() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/checkout?wait=true",
        Some(checkout_body("SKU-002", 2)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "CANCELLED");
    assert_eq!(json["reason"], "insufficient_stock");
}

#[tokio::test]
async fn test_checkout_validation_errors() {
    let (app, state) = setup_with_state().await;

    let (status, json) = send(
        &app,
        "POST",
        "/checkout",
        Some(serde_json::json!({ "line_items": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());

    let (status, _) = send(&app, "POST", "/checkout", Some(checkout_body("SKU-001", 0))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/checkout", Some(checkout_body("SKU-001", -2))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/checkout",
        Some(serde_json::json!({
            "buyer_id": "not-a-uuid",
            "line_items": [{ "product_id": "SKU-001", "quantity": 1, "unit_price_cents": 100 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(state.coordinator.store().order_count().await, 0);
}

#[tokio::test]
async fn test_get_order_errors() {
    let app = setup().await;

    let (status, _) = send(&app, "GET", "/orders/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app,
        "GET",
        &format!("/orders/{}", common::OrderId::new()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_cancel_completed_order_conflicts() {
    let app = setup().await;

    let (_, json) = send(
        &app,
        "POST",
        "/checkout?wait=true",
        Some(checkout_body("SKU-001", 1)),
    )
    .await;
    let order_id = json["order_id"].as_str().unwrap();

    let (status, json) = send(&app, "POST", &format!("/orders/{order_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("cannot be cancelled"));

    let (status, _) = send(
        &app,
        "POST",
        &format!("/orders/{}/cancel", common::OrderId::new()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders() {
    let app = setup().await;

    for _ in 0..3 {
        send(
            &app,
            "POST",
            "/checkout?wait=true",
            Some(checkout_body("SKU-001", 1)),
        )
        .await;
    }

    let (status, json) = send(&app, "GET", "/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 3);

    let (_, json) = send(&app, "GET", "/orders?limit=2", None).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_inventory_stock_endpoints() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "PUT",
        "/inventory/SKU-NEW",
        Some(serde_json::json!({ "total": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 7);
    assert_eq!(json["available"], 7);

    let (status, json) = send(&app, "GET", "/inventory/SKU-NEW", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["held"], 0);

    let (status, _) = send(&app, "GET", "/inventory/SKU-MISSING", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send(&app, "GET", "/inventory", None).await;
    assert_eq!(json.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_inventory_reserve_is_idempotent() {
    let app = setup().await;
    let order_id = common::OrderId::new().to_string();
    let body = serde_json::json!({
        "order_id": order_id,
        "product_id": "SKU-001",
        "quantity": 4,
        "idempotency_key": "client-key-1"
    });

    let (status, first) = send(&app, "POST", "/inventory/reserve", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["result"], "held");
    assert_eq!(first["reservation_id"], "client-key-1");

    let (_, replay) = send(&app, "POST", "/inventory/reserve", Some(body)).await;
    assert_eq!(replay["result"], "held");
    assert_eq!(replay["expires_at"], first["expires_at"]);

    let (_, level) = send(&app, "GET", "/inventory/SKU-001", None).await;
    assert_eq!(level["held"], 4);

    let (status, _) = send(
        &app,
        "POST",
        "/inventory/reserve",
        Some(serde_json::json!({
            "order_id": order_id,
            "product_id": "SKU-001",
            "quantity": 5,
            "idempotency_key": "client-key-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_inventory_reserve_insufficient() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/inventory/reserve",
        Some(serde_json::json!({
            "order_id": common::OrderId::new().to_string(),
            "product_id": "SKU-002",
            "quantity": 3,
            "idempotency_key": "k-insufficient"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "insufficient");
    assert_eq!(json["requested"], 3);
    assert_eq!(json["available"], 1);
}

#[tokio::test]
async fn test_payment_authorize_and_lookup() {
    let app = setup().await;
    let body = serde_json::json!({ "idempotency_key": "pay-1", "amount_cents": 4200 });

    let (status, first) = send(&app, "POST", "/payments/authorize", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["result"], "authorized");
    assert_eq!(first["intent"]["status"], "authorized");

    let (_, replay) = send(&app, "POST", "/payments/authorize", Some(body)).await;
    assert_eq!(replay["intent"]["created_at"], first["intent"]["created_at"]);

    let (status, json) = send(&app, "GET", "/payments/pay-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["amount_cents"], 4200);
    assert_eq!(json["method"], "card");

    let (status, _) = send(&app, "GET", "/payments/pay-unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "POST",
        "/payments/authorize",
        Some(serde_json::json!({ "idempotency_key": "pay-1", "amount_cents": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_payment_over_limit_is_declined() {
    let app = setup().await;

    let (status, json) = send(
        &app,
        "POST",
        "/payments/authorize",
        Some(serde_json::json!({ "idempotency_key": "pay-big", "amount_cents": 5_000_000 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], "declined");
    assert_eq!(json["reason"], payments::decline::LIMIT_EXCEEDED);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup().await;
    send(
        &app,
        "POST",
        "/checkout?wait=true",
        Some(checkout_body("SKU-001", 1)),
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("checkout_started_total"));
}

#[tokio::test]
async fn test_restart_resumes_orders_against_fresh_services() {
    use common::{BuyerId, Money, OrderId};
    use domain::{CancelReason, LineItem, Order, OrderStatus};
    use order_store::OrderStore;
    use std::time::Duration;

    // An order saved in Authorized by a process whose ledger and authorizer
    // died with it.
    let store = InMemoryOrderStore::new();
    let mut order = Order::place(
        OrderId::new(),
        BuyerId::new(),
        vec![LineItem::new("SKU-001", 2, Money::from_cents(1250))],
    )
    .unwrap();
    store.save(&order).await.unwrap();
    for next in [
        OrderStatus::Reserving,
        OrderStatus::Reserved,
        OrderStatus::Authorizing,
        OrderStatus::Authorized,
    ] {
        order.advance(next, None).unwrap();
        store.save(&order).await.unwrap();
    }

    let state = api::create_default_state(store, &Config::default());
    state
        .ledger
        .set_stock(&ProductId::new("SKU-001"), 10)
        .await
        .unwrap();
    assert_eq!(state.coordinator.resume().await.unwrap(), 1);

    let finished = state
        .coordinator
        .wait_for_terminal(order.id(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(finished.status(), OrderStatus::Cancelled);
    assert_eq!(finished.cancel_reason(), Some(CancelReason::CaptureFailed));

    let level = state.ledger.level(&ProductId::new("SKU-001")).await.unwrap();
    assert_eq!(level.held, 0);
    assert_eq!(level.committed, 0);
    assert_eq!(state.authorizer.intent_count().await, 0);
}
