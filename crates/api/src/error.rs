//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::InventoryError;
use payments::PaymentError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga or order store error.
    Saga(SagaError),
    /// Inventory ledger error.
    Inventory(InventoryError),
    /// Payment authorizer error.
    Payment(PaymentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Payment(err) => payment_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::Validation(_) => StatusCode::BAD_REQUEST,
        SagaError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::NotCancellable { .. } => StatusCode::CONFLICT,
        e if e.is_conflict() => StatusCode::CONFLICT,
        _ => {
            tracing::error!(error = %err, "saga error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    let status = match &err {
        InventoryError::InvalidQuantity { .. } | InventoryError::StockOverflow { .. } => {
            StatusCode::BAD_REQUEST
        }
        InventoryError::NotFound { .. } => StatusCode::NOT_FOUND,
        InventoryError::KeyMismatch { .. }
        | InventoryError::AlreadyCommitted { .. }
        | InventoryError::AlreadyReleased { .. }
        | InventoryError::ReservationExpired { .. }
        | InventoryError::StockBelowAllocated { .. } => StatusCode::CONFLICT,
    };
    (status, err.to_string())
}

fn payment_error_to_response(err: PaymentError) -> (StatusCode, String) {
    let status = match &err {
        PaymentError::NotFound { .. } => StatusCode::NOT_FOUND,
        PaymentError::AmountMismatch { .. }
        | PaymentError::AlreadyCaptured { .. }
        | PaymentError::NotCaptured { .. } => StatusCode::CONFLICT,
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Payment(err)
    }
}
