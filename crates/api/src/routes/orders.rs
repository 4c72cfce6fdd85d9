//! Order read and cancel endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::OrderId;
use domain::{Order, StepRecord};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Deserialize, Default)]
pub struct ListParams {
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub buyer_id: String,
    pub status: String,
    pub result: &'static str,
    pub reason: Option<&'static str>,
    pub cancel_requested: bool,
    pub line_items: Vec<LineItemResponse>,
    pub total_cents: i64,
    pub version: i64,
    pub steps: Vec<StepRecord>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let result = order.result();
        Self {
            order_id: order.id().to_string(),
            buyer_id: order.buyer_id().to_string(),
            status: order.status().to_string(),
            result: result.code(),
            reason: result.reason().map(|r| r.as_str()),
            cancel_requested: order.cancel_requested(),
            line_items: order
                .line_items()
                .iter()
                .map(|item| LineItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total().cents(),
            version: order.version().as_i64(),
            steps: order.steps().to_vec(),
            created_at: order.created_at().to_rfc3339(),
            updated_at: order.updated_at().to_rfc3339(),
        }
    }
}

// -- Handlers --

/// GET /orders: most recent orders first.
#[tracing::instrument(skip(state, params))]
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let orders = state
        .coordinator
        .store()
        .list(limit)
        .await
        .map_err(|e| ApiError::Saga(e.into()))?;

    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}: one order with its step history.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .coordinator
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/cancel: request cancellation of an in-flight order.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.coordinator.cancel_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
