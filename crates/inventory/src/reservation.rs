//! Reservation records.

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock is set aside for the order.
    Held,
    /// Stock is permanently decremented.
    Committed,
    /// Stock was returned to the pool.
    Released,
}

impl ReservationStatus {
    /// Returns the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Held => "held",
            ReservationStatus::Committed => "committed",
            ReservationStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a reservation was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// The owning order was compensated.
    Compensated,
    /// The hold outlived its TTL and the sweeper returned it.
    Expired,
}

impl ReleaseReason {
    /// Returns the reason name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Compensated => "compensated",
            ReleaseReason::Expired => "expired",
        }
    }
}

/// A quantity of one product set aside for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The idempotency key, which also identifies the reservation.
    pub key: IdempotencyKey,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub release_reason: Option<ReleaseReason>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub(crate) fn held(
        key: IdempotencyKey,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            order_id,
            product_id,
            quantity,
            status: ReservationStatus::Held,
            release_reason: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the reservation still holds stock.
    pub fn is_held(&self) -> bool {
        self.status == ReservationStatus::Held
    }

    /// Returns true if the hold has outlived its deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_held() && self.expires_at <= now
    }

    /// Returns true if this reservation was recorded for the same request.
    pub(crate) fn matches(&self, order_id: OrderId, product_id: &ProductId, quantity: u32) -> bool {
        self.order_id == order_id && &self.product_id == product_id && self.quantity == quantity
    }

    pub(crate) fn mark(&mut self, status: ReservationStatus, reason: Option<ReleaseReason>) {
        self.status = status;
        self.release_reason = reason;
        self.updated_at = Utc::now();
    }
}

/// Result of a reserve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReserveOutcome {
    /// The reservation, in its current status.
    ///
    /// A replay of a key that has since been committed or released reports
    /// that status; callers must check [`Reservation::is_held`] when it
    /// matters.
    Held(Reservation),
    /// Not enough unallocated stock.
    InsufficientStock { requested: u32, available: u32 },
}

impl ReserveOutcome {
    /// Returns the reservation if stock was set aside.
    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            ReserveOutcome::Held(reservation) => Some(reservation),
            ReserveOutcome::InsufficientStock { .. } => None,
        }
    }

    /// Returns the label used for metrics and the HTTP surface.
    pub fn label(&self) -> &'static str {
        match self {
            ReserveOutcome::Held(_) => "held",
            ReserveOutcome::InsufficientStock { .. } => "insufficient",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation() -> Reservation {
        let now = Utc::now();
        Reservation::held(
            IdempotencyKey::new("k"),
            OrderId::new(),
            ProductId::new("SKU-001"),
            3,
            now,
            now + chrono::Duration::seconds(60),
        )
    }

    #[test]
    fn test_expiry_only_applies_to_held() {
        let mut r = reservation();
        let later = r.expires_at + chrono::Duration::seconds(1);
        assert!(!r.is_expired_at(r.created_at));
        assert!(r.is_expired_at(later));

        r.mark(ReservationStatus::Committed, None);
        assert!(!r.is_expired_at(later));
    }

    #[test]
    fn test_matches_request() {
        let r = reservation();
        assert!(r.matches(r.order_id, &r.product_id, 3));
        assert!(!r.matches(r.order_id, &r.product_id, 4));
        assert!(!r.matches(OrderId::new(), &r.product_id, 3));
        assert!(!r.matches(r.order_id, &ProductId::new("SKU-002"), 3));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ReserveOutcome::InsufficientStock {
            requested: 4,
            available: 1,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "insufficient_stock");
        assert_eq!(json["available"], 1);
        assert_eq!(outcome.label(), "insufficient");

        let held = ReserveOutcome::Held(reservation());
        let json = serde_json::to_value(&held).unwrap();
        assert_eq!(json["result"], "held");
        assert_eq!(json["status"], "held");
        assert!(held.reservation().is_some());
    }
}
