//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::OrderStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Sagas currently being driven by this process.
    pub in_flight: usize,
}

/// GET /health: returns process health and saga load.
pub async fn check<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        in_flight: state.coordinator.in_flight().await,
    })
}
