//! Inventory service trait and its ledger-backed implementation.

use async_trait::async_trait;
use common::{IdempotencyKey, OrderId, ProductId};
use ::inventory::{InventoryError, InventoryLedger, Reservation, ReserveOutcome};

use crate::error::ServiceError;

/// Trait for inventory operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Sets aside stock for one line item.
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
        key: &IdempotencyKey,
    ) -> Result<ReserveOutcome, ServiceError>;

    /// Looks up a reservation by key.
    async fn get_reservation(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Reservation>, ServiceError>;

    /// Turns a hold into a sale.
    async fn commit(&self, key: &IdempotencyKey) -> Result<Reservation, ServiceError>;

    /// Returns held stock.
    async fn release(&self, key: &IdempotencyKey) -> Result<(), ServiceError>;
}

fn rejected(err: InventoryError) -> ServiceError {
    ServiceError::Rejected(err.to_string())
}

#[async_trait]
impl InventoryService for InventoryLedger {
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
        key: &IdempotencyKey,
    ) -> Result<ReserveOutcome, ServiceError> {
        InventoryLedger::reserve(self, order_id, product_id, quantity, key)
            .await
            .map_err(rejected)
    }

    async fn get_reservation(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Reservation>, ServiceError> {
        Ok(InventoryLedger::get_reservation(self, key).await)
    }

    async fn commit(&self, key: &IdempotencyKey) -> Result<Reservation, ServiceError> {
        InventoryLedger::commit(self, key).await.map_err(rejected)
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), ServiceError> {
        InventoryLedger::release(self, key).await.map_err(rejected)
    }
}
