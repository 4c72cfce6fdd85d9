//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its checkout lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Reserving ──┬──► Reserved ──► Authorizing ──┬──► Authorized ──► Capturing ──┬──► Completed
///    │                    │        │                      │         │                     │
///    │                    └────────┴──► ReservationFailed │         │                     └──► CaptureFailed
///    │                                                    └─────────┴──► AuthorizationFailed
///    │
///    └──► Cancelled ◄── (every *Failed status, once compensation is acknowledged)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order created, no downstream call made yet.
    #[default]
    Pending,

    /// Stock reservations are being placed.
    Reserving,

    /// Every line item holds a reservation.
    Reserved,

    /// Payment authorization is in flight.
    Authorizing,

    /// Payment authorized, not yet captured.
    Authorized,

    /// Payment capture is in flight.
    Capturing,

    /// Reservation failed or was abandoned; held stock is being released.
    ReservationFailed,

    /// Authorization failed or was abandoned; payment void and release pending.
    AuthorizationFailed,

    /// Capture failed; payment void and release pending.
    CaptureFailed,

    /// Payment captured and stock committed (terminal state).
    Completed,

    /// Order cancelled after compensation (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if this status is a failure status awaiting compensation.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OrderStatus::ReservationFailed
                | OrderStatus::AuthorizationFailed
                | OrderStatus::CaptureFailed
        )
    }

    /// Returns true if a caller may request cancellation in this status.
    ///
    /// Once capture is in flight the outcome belongs to the payment service,
    /// so cancellation is no longer accepted.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Reserving
                | OrderStatus::Reserved
                | OrderStatus::Authorizing
                | OrderStatus::Authorized
        )
    }

    /// Returns true if `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Reserving)
                | (Pending, Cancelled)
                | (Reserving, Reserved)
                | (Reserving, ReservationFailed)
                | (Reserved, Authorizing)
                | (Reserved, ReservationFailed)
                | (Authorizing, Authorized)
                | (Authorizing, AuthorizationFailed)
                | (Authorized, Capturing)
                | (Authorized, AuthorizationFailed)
                | (Capturing, Completed)
                | (Capturing, CaptureFailed)
                | (ReservationFailed, Cancelled)
                | (AuthorizationFailed, Cancelled)
                | (CaptureFailed, Cancelled)
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Reserving => "Reserving",
            OrderStatus::Reserved => "Reserved",
            OrderStatus::Authorizing => "Authorizing",
            OrderStatus::Authorized => "Authorized",
            OrderStatus::Capturing => "Capturing",
            OrderStatus::ReservationFailed => "ReservationFailed",
            OrderStatus::AuthorizationFailed => "AuthorizationFailed",
            OrderStatus::CaptureFailed => "CaptureFailed",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Parses a status from its name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_str() == s)
    }

    /// Every status, in lifecycle order.
    pub const ALL: [OrderStatus; 11] = [
        OrderStatus::Pending,
        OrderStatus::Reserving,
        OrderStatus::Reserved,
        OrderStatus::Authorizing,
        OrderStatus::Authorized,
        OrderStatus::Capturing,
        OrderStatus::ReservationFailed,
        OrderStatus::AuthorizationFailed,
        OrderStatus::CaptureFailed,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
