use async_trait::async_trait;
use common::{OrderId, Version};
use domain::Order;

use crate::Result;

/// Core trait for order store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the full order record.
    ///
    /// Fails with `VersionConflict` unless the stored version is exactly
    /// `order.version() - 1`. A new order is saved at version 1 and must not
    /// exist yet.
    async fn save(&self, order: &Order) -> Result<()>;

    /// Loads a single order.
    ///
    /// Returns None if the order was never saved.
    async fn load(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Loads every order that has not reached `Completed` or `Cancelled`.
    ///
    /// Used on startup to find sagas to resume. Orders are returned oldest first.
    async fn load_non_terminal(&self) -> Result<Vec<Order>>;

    /// Lists the most recently created orders, newest first.
    async fn list(&self, limit: usize) -> Result<Vec<Order>>;

    /// Gets the stored version of an order.
    ///
    /// Returns None if the order doesn't exist.
    async fn get_version(&self, order_id: OrderId) -> Result<Option<Version>> {
        Ok(self.load(order_id).await?.map(|order| order.version()))
    }
}

/// The version a store must currently hold for `order` to be saved.
pub fn expected_stored_version(order: &Order) -> Version {
    order.version().prev()
}
