//! Domain layer for the checkout saga.
//!
//! This crate provides:
//! - the [`Order`] record owned by the checkout coordinator
//! - the [`OrderStatus`] state machine and its allowed transitions
//! - step records kept for every downstream call an order makes
//! - synchronous validation of checkout requests

pub mod error;
pub mod order;

pub use error::OrderError;
pub use order::{
    CancelReason, CheckoutResult, LineItem, MAX_LINE_ITEMS, Order, OrderStatus, Step,
    StepOutcome, StepRecord,
};
