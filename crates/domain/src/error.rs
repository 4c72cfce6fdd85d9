//! Domain error types.

use common::ProductId;
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised while validating a checkout or mutating an order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The checkout contained no line items.
    #[error("Order has no line items")]
    NoItems,

    /// The checkout contained more line items than allowed.
    #[error("Order has {count} line items (maximum is {max})")]
    TooManyItems { count: usize, max: usize },

    /// A line item had an empty product ID.
    #[error("Line item has an empty product ID")]
    EmptyProductId,

    /// The same product appeared on more than one line.
    #[error("Product {product_id} appears on more than one line item")]
    DuplicateProduct { product_id: ProductId },

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_id}: {price} cents (must be greater than 0)")]
    InvalidPrice { product_id: ProductId, price: i64 },

    /// The order total does not fit in the money representation.
    #[error("Order total overflows")]
    TotalOverflow,

    /// The requested status change is not an edge of the state machine.
    #[error("Invalid state transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// The order already reached `Completed` or `Cancelled`.
    #[error("Order is terminal ({status}) and cannot be modified")]
    Terminal { status: OrderStatus },

    /// Cancellation was requested in a status that no longer allows it.
    #[error("Order cannot be cancelled while {status}")]
    NotCancellable { status: OrderStatus },
}
