//! Cancellation reasons and the result codes surfaced to checkout callers.

use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// Why an order ended up `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A line item could not be reserved.
    InsufficientStock,
    /// The payment authorizer declined the amount.
    PaymentDeclined,
    /// A downstream call kept failing past the attempt limit.
    TimeoutExceeded,
    /// The authorized payment could not be captured.
    CaptureFailed,
    /// A reservation expired before it could be committed.
    ReservationExpired,
    /// The buyer cancelled the checkout.
    CancelledByBuyer,
}

impl CancelReason {
    /// Returns the reason tag as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::InsufficientStock => "insufficient_stock",
            CancelReason::PaymentDeclined => "payment_declined",
            CancelReason::TimeoutExceeded => "timeout_exceeded",
            CancelReason::CaptureFailed => "capture_failed",
            CancelReason::ReservationExpired => "reservation_expired",
            CancelReason::CancelledByBuyer => "cancelled_by_buyer",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result code surfaced to the checkout caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutResult {
    /// The order is still in flight.
    Accepted,
    /// The order completed.
    Completed,
    /// The order was cancelled for the given reason.
    Cancelled(CancelReason),
}

impl CheckoutResult {
    /// Derives the result code from an order's status and cancel reason.
    pub fn from_status(status: OrderStatus, reason: Option<CancelReason>) -> Self {
        match status {
            OrderStatus::Completed => CheckoutResult::Completed,
            // A cancelled order always carries a reason; fall back for records
            // written before the reason was stored.
            OrderStatus::Cancelled => {
                CheckoutResult::Cancelled(reason.unwrap_or(CancelReason::CancelledByBuyer))
            }
            _ => CheckoutResult::Accepted,
        }
    }

    /// Returns the result code (`ACCEPTED`, `COMPLETED`, `CANCELLED`).
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutResult::Accepted => "ACCEPTED",
            CheckoutResult::Completed => "COMPLETED",
            CheckoutResult::Cancelled(_) => "CANCELLED",
        }
    }

    /// Returns the cancel reason tag, if cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        match self {
            CheckoutResult::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_tags() {
        assert_eq!(CancelReason::InsufficientStock.as_str(), "insufficient_stock");
        assert_eq!(
            serde_json::to_string(&CancelReason::PaymentDeclined).unwrap(),
            "\"payment_declined\""
        );
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(
            CheckoutResult::from_status(OrderStatus::Authorizing, None).code(),
            "ACCEPTED"
        );
        assert_eq!(
            CheckoutResult::from_status(OrderStatus::CaptureFailed, Some(CancelReason::CaptureFailed))
                .code(),
            "ACCEPTED"
        );
        assert_eq!(
            CheckoutResult::from_status(OrderStatus::Completed, None).code(),
            "COMPLETED"
        );

        let cancelled =
            CheckoutResult::from_status(OrderStatus::Cancelled, Some(CancelReason::TimeoutExceeded));
        assert_eq!(cancelled.code(), "CANCELLED");
        assert_eq!(cancelled.reason(), Some(CancelReason::TimeoutExceeded));
    }
}
