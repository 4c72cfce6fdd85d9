//! Per-product stock counters.

use common::ProductId;
use serde::{Deserialize, Serialize};

/// Counters for one product, guarded by the product's lock.
///
/// `held + committed <= total` at all times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StockCounters {
    pub total: u32,
    pub held: u32,
    pub committed: u32,
}

impl StockCounters {
    pub fn allocated(&self) -> u32 {
        self.held + self.committed
    }

    pub fn available(&self) -> u32 {
        self.total - self.allocated()
    }

    /// Moves `quantity` from available to held. Returns false if short.
    pub fn hold(&mut self, quantity: u32) -> bool {
        if quantity > self.available() {
            return false;
        }
        self.held += quantity;
        true
    }

    pub fn unhold(&mut self, quantity: u32) {
        self.held -= quantity;
    }

    pub fn commit_held(&mut self, quantity: u32) {
        self.held -= quantity;
        self.committed += quantity;
    }

    /// Commits straight from available. Returns false if short.
    pub fn commit_available(&mut self, quantity: u32) -> bool {
        if quantity > self.available() {
            return false;
        }
        self.committed += quantity;
        true
    }

    pub fn level(&self, product_id: ProductId) -> StockLevel {
        StockLevel {
            product_id,
            total: self.total,
            held: self.held,
            committed: self.committed,
            available: self.available(),
        }
    }
}

/// Point-in-time view of a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub total: u32,
    pub held: u32,
    pub committed: u32,
    pub available: u32,
}
