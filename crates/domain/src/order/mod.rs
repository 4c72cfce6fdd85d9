//! Order record and related types.

mod reason;
mod record;
mod status;
mod step;

pub use reason::{CancelReason, CheckoutResult};
pub use record::{LineItem, MAX_LINE_ITEMS, Order};
pub use status::OrderStatus;
pub use step::{Step, StepOutcome, StepRecord};
