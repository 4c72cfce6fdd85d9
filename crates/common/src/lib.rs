//! Shared identifiers and value objects used across the checkout services.

pub mod key;
pub mod money;
pub mod types;

pub use key::IdempotencyKey;
pub use money::Money;
pub use types::{BuyerId, OrderId, ProductId, Version};
