//! Checkout saga for order placement.
//!
//! The coordinator drives each order through these steps:
//! 1. Reserve inventory for every line item
//! 2. Authorize the payment
//! 3. Capture the payment, then commit the reservations
//!
//! If a step fails, the steps already taken are compensated (void or refund
//! the payment, release the reservations) and the order is cancelled with a
//! reason. Orders are persisted after every transition so that an interrupted
//! saga can be resumed.

pub mod coordinator;
pub mod error;
pub mod retry;
pub mod services;

pub use coordinator::{MAX_CONFLICT_RETRIES, MAX_STORE_RETRIES, OrderSagaCoordinator};
pub use error::{Result, SagaError, ServiceError};
pub use retry::RetryPolicy;
pub use services::{
    Fault, FaultInjector, FaultyInventory, FaultyPayment, InventoryService, Operation,
    PaymentService,
};
