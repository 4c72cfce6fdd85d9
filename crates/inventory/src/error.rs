//! Inventory error types.

use common::{IdempotencyKey, ProductId};
use thiserror::Error;

/// Errors returned by the inventory ledger.
///
/// Running out of stock is not an error; it is reported through
/// [`ReserveOutcome::InsufficientStock`](crate::ReserveOutcome).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// A reservation was requested for zero units.
    #[error("Invalid quantity for {product_id}: must be greater than 0")]
    InvalidQuantity { product_id: ProductId },

    /// The key was already used for a different order, product or quantity.
    #[error("Idempotency key {key} was already used for a different reservation")]
    KeyMismatch { key: IdempotencyKey },

    /// No reservation exists for the key.
    #[error("Reservation not found: {key}")]
    NotFound { key: IdempotencyKey },

    /// The reservation was committed and can no longer be released.
    #[error("Reservation {key} is already committed")]
    AlreadyCommitted { key: IdempotencyKey },

    /// The reservation was released by compensation and cannot be committed.
    #[error("Reservation {key} was released")]
    AlreadyReleased { key: IdempotencyKey },

    /// The reservation expired and its stock has since been taken.
    #[error("Reservation {key} expired and the stock is no longer available")]
    ReservationExpired { key: IdempotencyKey },

    /// A new stock total would be smaller than what is already held or sold.
    #[error("Cannot set stock of {product_id} to {total}: {allocated} units are allocated")]
    StockBelowAllocated {
        product_id: ProductId,
        total: u32,
        allocated: u32,
    },

    /// Restocking would overflow the counter.
    #[error("Stock counter for {product_id} overflows")]
    StockOverflow { product_id: ProductId },
}

/// Convenience type alias for inventory results.
pub type Result<T> = std::result::Result<T, InventoryError>;
