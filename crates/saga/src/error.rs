//! Saga error types.

use common::OrderId;
use domain::{OrderError, OrderStatus};
use order_store::OrderStoreError;
use thiserror::Error;

/// How a downstream call failed, as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No reply within the step timeout. The call may or may not have
    /// taken effect.
    #[error("Call timed out")]
    Timeout,

    /// The service could not be reached. Safe to retry.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service refused the request and will refuse it again.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The checkout request was invalid. No order was created.
    #[error("Invalid checkout: {0}")]
    Validation(OrderError),

    /// An order transition was refused.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(#[from] OrderStoreError),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order has progressed past the point where it can be cancelled.
    #[error("Order {order_id} cannot be cancelled in status {status}")]
    NotCancellable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The order did not reach a terminal status in time.
    #[error("Order {0} did not finish in time")]
    WaitTimeout(OrderId),
}

impl SagaError {
    /// Returns true if this is an order store version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_conflict())
    }

    /// Returns true if the order store failed for a reason other than a
    /// version conflict. The write may or may not have landed.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, SagaError::Store(e) if !e.is_conflict())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::Version;

    #[test]
    fn test_conflict_detection() {
        let err = SagaError::from(OrderStoreError::VersionConflict {
            order_id: OrderId::new(),
            expected: Version::first(),
            actual: Version::new(2),
        });
        assert!(err.is_conflict());
        assert!(!err.is_store_failure());
        assert!(!SagaError::OrderNotFound(OrderId::new()).is_conflict());
        assert!(!SagaError::OrderNotFound(OrderId::new()).is_store_failure());
    }
}
