//! Payment error types.

use common::{IdempotencyKey, Money};
use thiserror::Error;

use crate::intent::IntentStatus;

/// Errors returned by the payment authorizer.
///
/// Declines are outcomes, not errors; see
/// [`AuthorizeOutcome::Declined`](crate::AuthorizeOutcome).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The key was already used with a different amount.
    #[error("Idempotency key {key} was authorized for {recorded}, not {requested}")]
    AmountMismatch {
        key: IdempotencyKey,
        recorded: Money,
        requested: Money,
    },

    /// No intent exists for the key.
    #[error("Payment intent not found: {key}")]
    NotFound { key: IdempotencyKey },

    /// The intent was captured and can no longer be voided.
    #[error("Payment {key} is already captured")]
    AlreadyCaptured { key: IdempotencyKey },

    /// A refund was requested for an intent that was never captured.
    #[error("Payment {key} cannot be refunded from status {status}")]
    NotCaptured {
        key: IdempotencyKey,
        status: IntentStatus,
    },
}

/// Convenience type alias for payment results.
pub type Result<T> = std::result::Result<T, PaymentError>;
