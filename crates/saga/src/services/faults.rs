//! Fault injection wrappers for downstream services.
//!
//! [`FaultyInventory`] and [`FaultyPayment`] wrap a real service and, when
//! told to, make calls fail the way a network would: refused outright, applied
//! but with the reply lost, or never answered.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::{IdempotencyKey, Money, OrderId, ProductId};
use inventory::{Reservation, ReserveOutcome};
use payments::{AuthorizeOutcome, CaptureOutcome, PaymentIntent};
use tokio::sync::Mutex;

use crate::error::ServiceError;
use crate::services::{InventoryService, PaymentService};

/// A downstream operation that faults can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Reserve,
    GetReservation,
    Commit,
    Release,
    Authorize,
    Capture,
    Void,
    Refund,
    GetIntent,
}

/// How an injected fault behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fails with `Unavailable` without reaching the service.
    Unavailable,
    /// Reaches the service, then reports `Timeout`.
    LostResponse,
    /// Never completes.
    Hang,
}

#[derive(Debug, Default)]
struct FaultState {
    queued: HashMap<Operation, VecDeque<Fault>>,
    persistent: HashMap<Operation, Fault>,
    calls: HashMap<Operation, u32>,
}

/// Shared fault schedule. Clones share the same schedule.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<Mutex<FaultState>>,
}

impl FaultInjector {
    /// Creates an injector with no faults scheduled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call to `op` fail with `fault`. Calls queue up.
    pub async fn fail_next(&self, op: Operation, fault: Fault) {
        self.state
            .lock()
            .await
            .queued
            .entry(op)
            .or_default()
            .push_back(fault);
    }

    /// Makes every call to `op` fail with `fault` until cleared.
    pub async fn fail_always(&self, op: Operation, fault: Fault) {
        self.state.lock().await.persistent.insert(op, fault);
    }

    /// Removes all faults scheduled for `op`.
    pub async fn clear(&self, op: Operation) {
        let mut state = self.state.lock().await;
        state.queued.remove(&op);
        state.persistent.remove(&op);
    }

    /// Returns how many times `op` was called, faulted or not.
    pub async fn calls(&self, op: Operation) -> u32 {
        self.state
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    async fn next_fault(&self, op: Operation) -> Option<Fault> {
        let mut state = self.state.lock().await;
        *state.calls.entry(op).or_default() += 1;
        if let Some(fault) = state.queued.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(fault);
        }
        state.persistent.get(&op).copied()
    }

    async fn run<T>(
        &self,
        op: Operation,
        call: impl Future<Output = Result<T, ServiceError>> + Send,
    ) -> Result<T, ServiceError> {
        match self.next_fault(op).await {
            None => call.await,
            Some(Fault::Unavailable) => Err(ServiceError::Unavailable(format!(
                "injected fault on {op:?}"
            ))),
            Some(Fault::LostResponse) => {
                let _ = call.await;
                Err(ServiceError::Timeout)
            }
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

/// Inventory service wrapper that injects faults.
#[derive(Debug, Clone)]
pub struct FaultyInventory<I> {
    inner: I,
    faults: FaultInjector,
}

impl<I: InventoryService> FaultyInventory<I> {
    /// Wraps `inner` with an empty fault schedule.
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            faults: FaultInjector::new(),
        }
    }

    /// Returns the fault schedule.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the wrapped service.
    pub fn inner(&self) -> &I {
        &self.inner
    }
}

#[async_trait]
impl<I: InventoryService> InventoryService for FaultyInventory<I> {
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
        key: &IdempotencyKey,
    ) -> Result<ReserveOutcome, ServiceError> {
        self.faults
            .run(
                Operation::Reserve,
                self.inner.reserve(order_id, product_id, quantity, key),
            )
            .await
    }

    async fn get_reservation(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Reservation>, ServiceError> {
        self.faults
            .run(Operation::GetReservation, self.inner.get_reservation(key))
            .await
    }

    async fn commit(&self, key: &IdempotencyKey) -> Result<Reservation, ServiceError> {
        self.faults
            .run(Operation::Commit, self.inner.commit(key))
            .await
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<(), ServiceError> {
        self.faults
            .run(Operation::Release, self.inner.release(key))
            .await
    }
}

/// Payment service wrapper that injects faults.
#[derive(Debug, Clone)]
pub struct FaultyPayment<P> {
    inner: P,
    faults: FaultInjector,
}

impl<P: PaymentService> FaultyPayment<P> {
    /// Wraps `inner` with an empty fault schedule.
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            faults: FaultInjector::new(),
        }
    }

    /// Returns the fault schedule.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the wrapped service.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: PaymentService> PaymentService for FaultyPayment<P> {
    async fn authorize(
        &self,
        key: &IdempotencyKey,
        amount: Money,
    ) -> Result<AuthorizeOutcome, ServiceError> {
        self.faults
            .run(Operation::Authorize, self.inner.authorize(key, amount))
            .await
    }

    async fn capture(&self, key: &IdempotencyKey) -> Result<CaptureOutcome, ServiceError> {
        self.faults
            .run(Operation::Capture, self.inner.capture(key))
            .await
    }

    async fn void(&self, key: &IdempotencyKey) -> Result<(), ServiceError> {
        self.faults.run(Operation::Void, self.inner.void(key)).await
    }

    async fn refund(&self, key: &IdempotencyKey) -> Result<(), ServiceError> {
        self.faults
            .run(Operation::Refund, self.inner.refund(key))
            .await
    }

    async fn get_intent(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PaymentIntent>, ServiceError> {
        self.faults
            .run(Operation::GetIntent, self.inner.get_intent(key))
            .await
    }
}
