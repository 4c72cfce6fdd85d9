//! Inventory ledger endpoints.

use std::sync::Arc;

use ::inventory::{ReserveOutcome, StockLevel};
use axum::Json;
use axum::extract::{Path, State};
use common::{IdempotencyKey, OrderId, ProductId};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ReserveRequest {
    pub order_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub idempotency_key: String,
}

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub total: u32,
}

#[derive(Serialize)]
pub struct ReserveResponse {
    /// `held` or `insufficient`.
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub requested: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<u32>,
}

impl From<&ReserveOutcome> for ReserveResponse {
    fn from(outcome: &ReserveOutcome) -> Self {
        match outcome {
            ReserveOutcome::Held(reservation) => Self {
                result: outcome.label(),
                reservation_id: Some(reservation.key.to_string()),
                status: Some(reservation.status.as_str()),
                expires_at: Some(reservation.expires_at.to_rfc3339()),
                requested: reservation.quantity,
                available: None,
            },
            ReserveOutcome::InsufficientStock {
                requested,
                available,
            } => Self {
                result: outcome.label(),
                reservation_id: None,
                status: None,
                expires_at: None,
                requested: *requested,
                available: Some(*available),
            },
        }
    }
}

/// POST /inventory/reserve: hold stock under an idempotency key.
#[tracing::instrument(skip(state, req), fields(key = %req.idempotency_key))]
pub async fn reserve<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, ApiError> {
    let order_id = OrderId::parse(&req.order_id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order_id: {e}")))?;
    if req.idempotency_key.is_empty() {
        return Err(ApiError::BadRequest(
            "idempotency_key must not be empty".to_string(),
        ));
    }

    let outcome = state
        .ledger
        .reserve(
            order_id,
            &ProductId::new(req.product_id),
            req.quantity,
            &IdempotencyKey::new(req.idempotency_key),
        )
        .await?;

    Ok(Json(ReserveResponse::from(&outcome)))
}

/// PUT /inventory/{product_id}: set a product's total stock.
#[tracing::instrument(skip(state, req), fields(total = req.total))]
pub async fn set_stock<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockLevel>, ApiError> {
    let level = state
        .ledger
        .set_stock(&ProductId::new(product_id), req.total)
        .await?;
    Ok(Json(level))
}

/// GET /inventory/{product_id}: stock level of one product.
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockLevel>, ApiError> {
    state
        .ledger
        .level(&ProductId::new(product_id.as_str()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Product {product_id} not found")))
}

/// GET /inventory: stock levels of every product.
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<Vec<StockLevel>> {
    Json(state.ledger.levels().await)
}
