//! Durable storage for orders.
//!
//! The store is written only by the checkout coordinator. Each save must carry
//! exactly the stored version plus one, which doubles as a lease: a second
//! coordinator instance driving the same order loses the race with a
//! [`OrderStoreError::VersionConflict`].

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{OrderStore, expected_stored_version};
