//! Idempotency keys shared by the checkout coordinator and downstream services.

use serde::{Deserialize, Serialize};

use crate::{OrderId, ProductId};

/// Token that makes repeated downstream calls collapse into one logical effect.
///
/// The coordinator derives keys deterministically from the order ID and the
/// step name, so a retried or resumed step always presents the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wraps a caller-supplied key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key used for reserving `product_id` on behalf of `order_id`.
    pub fn for_reservation(order_id: OrderId, product_id: &ProductId) -> Self {
        Self(format!("{order_id}:reserve:{product_id}"))
    }

    /// Key used for the single payment intent of `order_id`.
    pub fn for_payment(order_id: OrderId) -> Self {
        Self(format!("{order_id}:payment"))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IdempotencyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}
