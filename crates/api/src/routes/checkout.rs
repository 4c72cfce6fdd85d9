//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use common::{BuyerId, Money};
use domain::{CheckoutResult, LineItem, Order, OrderStatus};
use order_store::OrderStore;
use saga::SagaError;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CheckoutRequest {
    pub buyer_id: Option<String>,
    pub line_items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
pub struct LineItemRequest {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Deserialize, Default)]
pub struct CheckoutParams {
    /// Block until the order is completed or cancelled.
    #[serde(default)]
    pub wait: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub status: String,
}

impl From<&Order> for CheckoutResponse {
    fn from(order: &Order) -> Self {
        let result = order.result();
        Self {
            order_id: order.id().to_string(),
            result: result.code(),
            reason: result.reason().map(|r| r.as_str()),
            status: order.status().to_string(),
        }
    }
}

/// POST /checkout: validate a checkout and start its saga.
///
/// Answers `202 ACCEPTED` right away, or with `?wait=true` the final result
/// once the order completes or is cancelled.
#[tracing::instrument(skip(state, req), fields(items = req.line_items.len()))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<CheckoutParams>,
    Json(req): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let buyer_id = match req.buyer_id.as_deref() {
        Some(id) => {
            let uuid = uuid::Uuid::parse_str(id)
                .map_err(|e| ApiError::BadRequest(format!("Invalid buyer_id: {e}")))?;
            BuyerId::from_uuid(uuid)
        }
        None => BuyerId::new(),
    };

    let line_items = req
        .line_items
        .iter()
        .map(|item| {
            let quantity = u32::try_from(item.quantity).map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid quantity {} for {}",
                    item.quantity, item.product_id
                ))
            })?;
            Ok(LineItem::new(
                item.product_id.as_str(),
                quantity,
                Money::from_cents(item.unit_price_cents),
            ))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let order_id = state
        .coordinator
        .start_checkout(buyer_id, line_items)
        .await?;

    if !params.wait {
        return Ok((
            StatusCode::ACCEPTED,
            Json(CheckoutResponse {
                order_id: order_id.to_string(),
                result: CheckoutResult::Accepted.code(),
                reason: None,
                status: OrderStatus::Pending.to_string(),
            }),
        ));
    }

    let order = match state
        .coordinator
        .wait_for_terminal(order_id, state.checkout_wait)
        .await
    {
        Ok(order) => order,
        Err(SagaError::WaitTimeout(_)) => state
            .coordinator
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))?,
        Err(e) => return Err(e.into()),
    };
    let status = if order.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(CheckoutResponse::from(&order))))
}
