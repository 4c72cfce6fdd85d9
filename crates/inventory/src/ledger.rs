//! The inventory ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, ProductId};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{InventoryError, Result};
use crate::reservation::{ReleaseReason, Reservation, ReservationStatus, ReserveOutcome};
use crate::stock::{StockCounters, StockLevel};

/// Ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How long a `Held` reservation lives before the sweeper releases it.
    pub reservation_ttl: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(900),
        }
    }
}

/// What the ledger remembers about a key.
#[derive(Debug, Clone)]
enum Entry {
    Reservation(Reservation),
    /// A reserve that found too little stock. Replays report the same numbers.
    Rejected {
        order_id: OrderId,
        product_id: ProductId,
        requested: u32,
        available: u32,
    },
    /// Released before any reserve arrived. A late reserve must not hold stock.
    Tombstone,
}

struct LedgerInner {
    ttl: chrono::Duration,
    products: RwLock<HashMap<ProductId, Arc<Mutex<StockCounters>>>>,
    entries: RwLock<HashMap<IdempotencyKey, Entry>>,
}

/// Per-product stock counters and the reservations held against them.
///
/// Each product's counters sit behind their own mutex, so reservations for
/// different products never wait on each other. Whenever both are needed the
/// product mutex is taken before the entry map.
///
/// Clones share the same ledger.
#[derive(Clone)]
pub struct InventoryLedger {
    inner: Arc<LedgerInner>,
}

impl Default for InventoryLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl InventoryLedger {
    /// Creates an empty ledger.
    pub fn new(config: LedgerConfig) -> Self {
        let ttl = chrono::Duration::from_std(config.reservation_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            inner: Arc::new(LedgerInner {
                ttl,
                products: RwLock::new(HashMap::new()),
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    async fn product(&self, product_id: &ProductId) -> Option<Arc<Mutex<StockCounters>>> {
        self.inner.products.read().await.get(product_id).cloned()
    }

    async fn product_or_insert(&self, product_id: &ProductId) -> Arc<Mutex<StockCounters>> {
        if let Some(product) = self.product(product_id).await {
            return product;
        }
        self.inner
            .products
            .write()
            .await
            .entry(product_id.clone())
            .or_default()
            .clone()
    }

    /// Sets a product's total stock, creating the product if needed.
    pub async fn set_stock(&self, product_id: &ProductId, total: u32) -> Result<StockLevel> {
        let product = self.product_or_insert(product_id).await;
        let mut counters = product.lock().await;
        if total < counters.allocated() {
            return Err(InventoryError::StockBelowAllocated {
                product_id: product_id.clone(),
                total,
                allocated: counters.allocated(),
            });
        }
        counters.total = total;
        info!(product_id = %product_id, total, "Stock set");
        Ok(counters.level(product_id.clone()))
    }

    /// Adds `delta` units to a product's total stock.
    pub async fn restock(&self, product_id: &ProductId, delta: u32) -> Result<StockLevel> {
        let product = self.product_or_insert(product_id).await;
        let mut counters = product.lock().await;
        counters.total =
            counters
                .total
                .checked_add(delta)
                .ok_or_else(|| InventoryError::StockOverflow {
                    product_id: product_id.clone(),
                })?;
        info!(product_id = %product_id, delta, total = counters.total, "Restocked");
        Ok(counters.level(product_id.clone()))
    }

    /// Returns the current stock level for a product.
    pub async fn level(&self, product_id: &ProductId) -> Option<StockLevel> {
        let product = self.product(product_id).await?;
        let counters = product.lock().await;
        Some(counters.level(product_id.clone()))
    }

    /// Returns the stock levels of every known product, ordered by product ID.
    pub async fn levels(&self) -> Vec<StockLevel> {
        let mut products: Vec<_> = self
            .inner
            .products
            .read()
            .await
            .iter()
            .map(|(id, product)| (id.clone(), product.clone()))
            .collect();
        products.sort_by(|a, b| a.0.cmp(&b.0));

        let mut levels = Vec::with_capacity(products.len());
        for (id, product) in products {
            levels.push(product.lock().await.level(id));
        }
        levels
    }

    /// Sets aside `quantity` units of a product for an order.
    ///
    /// The first call for a key decides the outcome. Later calls with the
    /// same key return it again without touching stock; a held reservation is
    /// returned in whatever status it has reached since.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
        key: &IdempotencyKey,
    ) -> Result<ReserveOutcome> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: product_id.clone(),
            });
        }

        if let Some(entry) = self.inner.entries.read().await.get(key)
            && !matches!(entry, Entry::Tombstone)
        {
            let outcome = replay(entry, key, order_id, product_id, quantity)?;
            metrics::counter!("inventory_reservations_total", "result" => "replayed").increment(1);
            return Ok(outcome);
        }

        let Some(product) = self.product(product_id).await else {
            let mut entries = self.inner.entries.write().await;
            return reject_or_replay(&mut entries, key, order_id, product_id, quantity, 0);
        };

        let mut counters = product.lock().await;
        let mut entries = self.inner.entries.write().await;

        match entries.get(key) {
            Some(Entry::Tombstone) => {
                let now = Utc::now();
                let mut reservation =
                    Reservation::held(key.clone(), order_id, product_id.clone(), quantity, now, now);
                reservation.mark(ReservationStatus::Released, Some(ReleaseReason::Compensated));
                entries.insert(key.clone(), Entry::Reservation(reservation.clone()));
                warn!("Reserve arrived after release; no stock held");
                return Ok(ReserveOutcome::Held(reservation));
            }
            Some(entry) => return replay(entry, key, order_id, product_id, quantity),
            None => {}
        }

        if !counters.hold(quantity) {
            let available = counters.available();
            return reject_or_replay(&mut entries, key, order_id, product_id, quantity, available);
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.inner.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let reservation = Reservation::held(
            key.clone(),
            order_id,
            product_id.clone(),
            quantity,
            now,
            expires_at,
        );
        entries.insert(key.clone(), Entry::Reservation(reservation.clone()));

        metrics::counter!("inventory_reservations_total", "result" => "held").increment(1);
        info!(
            order_id = %order_id,
            product_id = %product_id,
            quantity,
            available = counters.available(),
            "Stock reserved"
        );
        Ok(ReserveOutcome::Held(reservation))
    }

    /// Looks up the reservation recorded under a key.
    pub async fn get_reservation(&self, key: &IdempotencyKey) -> Option<Reservation> {
        match self.inner.entries.read().await.get(key) {
            Some(Entry::Reservation(reservation)) => Some(reservation.clone()),
            _ => None,
        }
    }

    /// Turns a hold into a permanent decrement.
    ///
    /// Committing twice is a no-op. A reservation the sweeper already
    /// released is re-acquired if the stock is still free.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn commit(&self, key: &IdempotencyKey) -> Result<Reservation> {
        let product_id = match self.inner.entries.read().await.get(key) {
            Some(Entry::Reservation(r)) if r.status == ReservationStatus::Committed => {
                return Ok(r.clone());
            }
            Some(Entry::Reservation(r)) => r.product_id.clone(),
            _ => return Err(InventoryError::NotFound { key: key.clone() }),
        };
        let product = self
            .product(&product_id)
            .await
            .ok_or_else(|| InventoryError::NotFound { key: key.clone() })?;

        let mut counters = product.lock().await;
        let mut entries = self.inner.entries.write().await;
        let Some(Entry::Reservation(reservation)) = entries.get_mut(key) else {
            return Err(InventoryError::NotFound { key: key.clone() });
        };

        match (reservation.status, reservation.release_reason) {
            (ReservationStatus::Committed, _) => {}
            (ReservationStatus::Held, _) => {
                counters.commit_held(reservation.quantity);
                reservation.mark(ReservationStatus::Committed, None);
                debug!(product_id = %product_id, quantity = reservation.quantity, "Reservation committed");
            }
            (ReservationStatus::Released, Some(ReleaseReason::Expired)) => {
                if !counters.commit_available(reservation.quantity) {
                    warn!(product_id = %product_id, "Expired reservation could not be re-acquired");
                    return Err(InventoryError::ReservationExpired { key: key.clone() });
                }
                reservation.mark(ReservationStatus::Committed, None);
                warn!(product_id = %product_id, "Expired reservation re-acquired on commit");
            }
            (ReservationStatus::Released, _) => {
                return Err(InventoryError::AlreadyReleased { key: key.clone() });
            }
        }
        Ok(reservation.clone())
    }

    /// Returns held stock to the pool.
    ///
    /// Releasing twice is a no-op. Releasing a key nothing was reserved under
    /// leaves a tombstone so that a reserve arriving later holds nothing.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        let product_id = {
            let mut entries = self.inner.entries.write().await;
            match entries.get(key) {
                None => {
                    entries.insert(key.clone(), Entry::Tombstone);
                    debug!("Released unknown key; tombstone recorded");
                    return Ok(());
                }
                Some(Entry::Tombstone) | Some(Entry::Rejected { .. }) => return Ok(()),
                Some(Entry::Reservation(r)) => match r.status {
                    ReservationStatus::Released => return Ok(()),
                    ReservationStatus::Committed => {
                        return Err(InventoryError::AlreadyCommitted { key: key.clone() });
                    }
                    ReservationStatus::Held => r.product_id.clone(),
                },
            }
        };

        self.release_held(key, &product_id, ReleaseReason::Compensated, None)
            .await
            .map(|_| ())
    }

    /// Releases a held reservation under the product lock. With `expired_at`
    /// set, only releases if the hold has expired by then.
    async fn release_held(
        &self,
        key: &IdempotencyKey,
        product_id: &ProductId,
        reason: ReleaseReason,
        expired_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let Some(product) = self.product(product_id).await else {
            return Ok(false);
        };
        let mut counters = product.lock().await;
        let mut entries = self.inner.entries.write().await;
        let Some(Entry::Reservation(reservation)) = entries.get_mut(key) else {
            return Ok(false);
        };

        match reservation.status {
            ReservationStatus::Committed if expired_at.is_none() => {
                Err(InventoryError::AlreadyCommitted { key: key.clone() })
            }
            ReservationStatus::Held => {
                if let Some(now) = expired_at
                    && !reservation.is_expired_at(now)
                {
                    return Ok(false);
                }
                counters.unhold(reservation.quantity);
                reservation.mark(ReservationStatus::Released, Some(reason));
                info!(
                    product_id = %product_id,
                    quantity = reservation.quantity,
                    reason = reason.as_str(),
                    "Reservation released"
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Releases every hold whose deadline is at or before `now`.
    ///
    /// Returns the number of reservations released.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(IdempotencyKey, ProductId)> = self
            .inner
            .entries
            .read()
            .await
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Reservation(r) if r.is_expired_at(now) => {
                    Some((key.clone(), r.product_id.clone()))
                }
                _ => None,
            })
            .collect();

        let mut released = 0;
        for (key, product_id) in expired {
            if let Ok(true) = self
                .release_held(&key, &product_id, ReleaseReason::Expired, Some(now))
                .await
            {
                released += 1;
            }
        }

        if released > 0 {
            metrics::counter!("inventory_expired_total").increment(released as u64);
        }
        released
    }

    /// Spawns a task that sweeps expired holds every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let ledger = self.clone();
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let released = ledger.sweep_expired_at(Utc::now()).await;
                if released > 0 {
                    info!(released, "Released expired reservations");
                }
            }
        })
    }
}

fn replay(
    entry: &Entry,
    key: &IdempotencyKey,
    order_id: OrderId,
    product_id: &ProductId,
    quantity: u32,
) -> Result<ReserveOutcome> {
    let mismatch = || InventoryError::KeyMismatch { key: key.clone() };
    match entry {
        Entry::Reservation(reservation) => {
            if !reservation.matches(order_id, product_id, quantity) {
                return Err(mismatch());
            }
            Ok(ReserveOutcome::Held(reservation.clone()))
        }
        Entry::Rejected {
            order_id: recorded_order,
            product_id: recorded_product,
            requested,
            available,
        } => {
            if *recorded_order != order_id || recorded_product != product_id || *requested != quantity
            {
                return Err(mismatch());
            }
            Ok(ReserveOutcome::InsufficientStock {
                requested: *requested,
                available: *available,
            })
        }
        Entry::Tombstone => Err(mismatch()),
    }
}

fn reject_or_replay(
    entries: &mut HashMap<IdempotencyKey, Entry>,
    key: &IdempotencyKey,
    order_id: OrderId,
    product_id: &ProductId,
    quantity: u32,
    available: u32,
) -> Result<ReserveOutcome> {
    match entries.get(key) {
        Some(Entry::Tombstone) | None => {}
        Some(entry) => return replay(entry, key, order_id, product_id, quantity),
    }
    entries.insert(
        key.clone(),
        Entry::Rejected {
            order_id,
            product_id: product_id.clone(),
            requested: quantity,
            available,
        },
    );
    metrics::counter!("inventory_reservations_total", "result" => "insufficient").increment(1);
    warn!(
        order_id = %order_id,
        product_id = %product_id,
        requested = quantity,
        available,
        "Insufficient stock"
    );
    Ok(ReserveOutcome::InsufficientStock {
        requested: quantity,
        available,
    })
}
