//! Payment authorizer endpoints.

use std::sync::Arc;

use ::payments::{AuthorizeOutcome, PaymentIntent};
use axum::Json;
use axum::extract::{Path, State};
use common::{IdempotencyKey, Money};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct AuthorizeRequest {
    pub idempotency_key: String,
    pub amount_cents: i64,
    pub method: Option<String>,
}

#[derive(Serialize)]
pub struct AuthorizeResponse {
    /// `authorized` or `declined`.
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentResponse>,
}

#[derive(Serialize)]
pub struct IntentResponse {
    pub idempotency_key: String,
    pub amount_cents: i64,
    pub status: &'static str,
    pub method: String,
    pub reason: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&PaymentIntent> for IntentResponse {
    fn from(intent: &PaymentIntent) -> Self {
        Self {
            idempotency_key: intent.key.to_string(),
            amount_cents: intent.amount.cents(),
            status: intent.status.as_str(),
            method: intent.method.clone(),
            reason: intent.reason.clone(),
            transaction_id: intent.transaction_id.clone(),
            created_at: intent.created_at.to_rfc3339(),
            updated_at: intent.updated_at.to_rfc3339(),
        }
    }
}

/// POST /payments/authorize: authorize an amount under an idempotency key.
#[tracing::instrument(skip(state, req), fields(key = %req.idempotency_key))]
pub async fn authorize<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    if req.idempotency_key.is_empty() {
        return Err(ApiError::BadRequest(
            "idempotency_key must not be empty".to_string(),
        ));
    }

    let key = IdempotencyKey::new(req.idempotency_key);
    let amount = Money::from_cents(req.amount_cents);
    let outcome = match req.method.as_deref() {
        Some(method) => {
            state
                .authorizer
                .authorize_with_method(&key, amount, method)
                .await?
        }
        None => state.authorizer.authorize(&key, amount).await?,
    };

    let response = match &outcome {
        AuthorizeOutcome::Authorized(intent) => AuthorizeResponse {
            result: outcome.label(),
            reason: None,
            intent: Some(IntentResponse::from(intent)),
        },
        AuthorizeOutcome::Declined { reason } => AuthorizeResponse {
            result: outcome.label(),
            reason: Some(reason.clone()),
            intent: None,
        },
    };
    Ok(Json(response))
}

/// GET /payments/{key}: look up a payment intent.
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(key): Path<String>,
) -> Result<Json<IntentResponse>, ApiError> {
    state
        .authorizer
        .get_intent(&IdempotencyKey::new(key.as_str()))
        .await
        .map(|intent| Json(IntentResponse::from(&intent)))
        .ok_or_else(|| ApiError::NotFound(format!("Payment intent {key} not found")))
}
