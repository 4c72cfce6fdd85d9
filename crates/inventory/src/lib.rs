//! Inventory ledger.
//!
//! Tracks stock per product and hands out reservations against it. Every
//! reservation is identified by the idempotency key the caller supplied, so a
//! retried call never decrements stock twice.
//!
//! A reservation moves through:
//! - `Held`: stock set aside, expires after the configured TTL
//! - `Committed`: stock permanently sold
//! - `Released`: stock returned, either by compensation or by expiry

pub mod error;
pub mod ledger;
pub mod reservation;
pub mod stock;

pub use error::{InventoryError, Result};
pub use ledger::{InventoryLedger, LedgerConfig};
pub use reservation::{ReleaseReason, Reservation, ReservationStatus, ReserveOutcome};
pub use stock::StockLevel;
