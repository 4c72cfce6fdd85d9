use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, Version};
use domain::Order;
use tokio::sync::RwLock;

use crate::{OrderStoreError, Result, store::OrderStore, store::expected_stored_version};

/// In-memory order store.
///
/// Provides the same version semantics as the PostgreSQL implementation.
/// Clones share the same underlying map, which lets tests hand one store to
/// several coordinator instances.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;

        let expected = expected_stored_version(order);
        let actual = orders
            .get(&order.id())
            .map(Order::version)
            .unwrap_or(Version::initial());

        if actual != expected || order.version() == Version::initial() {
            metrics::counter!("order_store_conflicts_total").increment(1);
            return Err(OrderStoreError::VersionConflict {
                order_id: order.id(),
                expected,
                actual,
            });
        }

        orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn load_non_terminal(&self) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut pending: Vec<_> = orders
            .values()
            .filter(|order| !order.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|order| order.created_at());
        Ok(pending)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut all: Vec<_> = orders.values().cloned().collect();
        all.sort_by_key(|order| std::cmp::Reverse(order.created_at()));
        all.truncate(limit);
        Ok(all)
    }
}
