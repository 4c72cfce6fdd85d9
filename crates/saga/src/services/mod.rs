//! Downstream service interfaces used by the coordinator.
//!
//! The coordinator talks to inventory and payments only through these traits.
//! Each returns a [`ServiceError`](crate::ServiceError) so that transport
//! failures and business refusals can be told apart.

pub mod faults;
pub mod inventory;
pub mod payment;

pub use faults::{Fault, FaultInjector, FaultyInventory, FaultyPayment, Operation};
pub use inventory::InventoryService;
pub use payment::PaymentService;
