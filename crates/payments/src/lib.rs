//! Payment authorizer.
//!
//! Holds one payment intent per idempotency key and moves it through
//! authorize, capture, void and refund. Every operation can be replayed with
//! the same key and returns the recorded outcome instead of charging again.

pub mod authorizer;
pub mod error;
pub mod intent;

pub use authorizer::{AuthorizerConfig, PaymentAuthorizer, decline};
pub use error::{PaymentError, Result};
pub use intent::{AuthorizeOutcome, CaptureOutcome, IntentStatus, PaymentIntent};
