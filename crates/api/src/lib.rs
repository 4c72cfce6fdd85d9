//! HTTP API server for the checkout saga.
//!
//! Exposes checkout and order endpoints backed by the saga coordinator, plus
//! direct access to the inventory ledger and payment authorizer, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use inventory::{InventoryLedger, LedgerConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use payments::{AuthorizerConfig, PaymentAuthorizer};
use saga::OrderSagaCoordinator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// The coordinator wired to the in-process ledger and authorizer.
pub type Coordinator<S> = OrderSagaCoordinator<S, InventoryLedger, PaymentAuthorizer>;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub coordinator: Coordinator<S>,
    pub ledger: InventoryLedger,
    pub authorizer: PaymentAuthorizer,
    /// How long `POST /checkout?wait=true` waits for a final result.
    pub checkout_wait: Duration,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/checkout", post(routes::checkout::create::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/inventory", get(routes::inventory::list::<S>))
        .route("/inventory/reserve", post(routes::inventory::reserve::<S>))
        .route(
            "/inventory/{product_id}",
            get(routes::inventory::get::<S>).put(routes::inventory::set_stock::<S>),
        )
        .route("/payments/authorize", post(routes::payments::authorize::<S>))
        .route("/payments/{key}", get(routes::payments::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around `store` with an in-process ledger
/// and authorizer configured from `config`.
pub fn create_default_state<S: OrderStore + 'static>(store: S, config: &Config) -> Arc<AppState<S>> {
    let ledger = InventoryLedger::new(LedgerConfig {
        reservation_ttl: config.reservation_ttl,
    });
    let authorizer = PaymentAuthorizer::new(AuthorizerConfig {
        max_amount: config.payment_max_amount,
        ..AuthorizerConfig::default()
    });
    let coordinator =
        OrderSagaCoordinator::new(store, ledger.clone(), authorizer.clone(), config.retry.clone());

    Arc::new(AppState {
        coordinator,
        ledger,
        authorizer,
        checkout_wait: config
            .worst_case_saga()
            .unwrap_or(config.reservation_ttl),
    })
}
