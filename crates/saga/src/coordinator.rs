//! Order saga coordinator.
//!
//! Drives each order through reserve, authorize and capture, compensating on
//! failure. Every status change is saved before the next downstream call, so a
//! restarted coordinator picks up where the last one stopped and re-issues the
//! pending call under the same idempotency key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{BuyerId, IdempotencyKey, OrderId};
use domain::{
    CancelReason, LineItem, Order, OrderError, OrderStatus, Step, StepOutcome, StepRecord,
};
use inventory::{ReservationStatus, ReserveOutcome};
use order_store::OrderStore;
use payments::{AuthorizeOutcome, CaptureOutcome, IntentStatus, PaymentIntent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{Result, SagaError, ServiceError};
use crate::retry::RetryPolicy;
use crate::services::{InventoryService, PaymentService};

/// Consecutive version conflicts a driver tolerates before it gives the order
/// up to whichever instance is writing it.
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Consecutive order store failures a driver tolerates before it stops an
/// order that holds no payment. The order resumes on the next start; its
/// reservations lapse meanwhile.
pub const MAX_STORE_RETRIES: u32 = 10;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of a downstream call after retries.
#[derive(Debug)]
enum StepCall<T> {
    /// The call (or a re-query) produced an answer.
    Done { value: T, attempts: u32 },
    /// The service refused the request outright.
    Rejected { reason: String, attempts: u32 },
    /// The attempt limit ran out without a known outcome.
    Exhausted { attempts: u32 },
}

struct Inner<S, I, P> {
    store: S,
    inventory: I,
    payment: P,
    policy: RetryPolicy,
    drivers: Mutex<HashMap<OrderId, JoinHandle<()>>>,
}

/// Orchestrates checkout sagas.
///
/// Each order runs on its own task. Within a process an order has at most one
/// driver; across processes the order store's version check decides which
/// writer wins.
pub struct OrderSagaCoordinator<S, I, P> {
    inner: Arc<Inner<S, I, P>>,
}

impl<S, I, P> Clone for OrderSagaCoordinator<S, I, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, I, P> OrderSagaCoordinator<S, I, P>
where
    S: OrderStore + 'static,
    I: InventoryService + 'static,
    P: PaymentService + 'static,
{
    /// Creates a new coordinator.
    pub fn new(store: S, inventory: I, payment: P, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                inventory,
                payment,
                policy,
                drivers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the order store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Validates a checkout, persists the order in `Pending` and starts
    /// driving it in the background.
    #[tracing::instrument(skip(self, line_items), fields(items = line_items.len()))]
    pub async fn start_checkout(
        &self,
        buyer_id: BuyerId,
        line_items: Vec<LineItem>,
    ) -> Result<OrderId> {
        let order =
            Order::place(OrderId::new(), buyer_id, line_items).map_err(SagaError::Validation)?;
        let order_id = order.id();

        self.inner.store.save(&order).await?;
        metrics::counter!("checkout_started_total").increment(1);
        info!(%order_id, total = %order.total(), "Checkout started");

        self.spawn_driver(order).await;
        Ok(order_id)
    }

    /// Reads an order from the store.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.inner.store.load(order_id).await?)
    }

    /// Asks for an order to be cancelled.
    ///
    /// The request is recorded on the order; its driver acts on it at the next
    /// step boundary. Fails once capture has started.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut attempt = 0;
        loop {
            let mut order = self
                .inner
                .store
                .load(order_id)
                .await?
                .ok_or(SagaError::OrderNotFound(order_id))?;

            match order.request_cancel() {
                Ok(false) => return Ok(order),
                Ok(true) => {}
                Err(OrderError::NotCancellable { status } | OrderError::Terminal { status }) => {
                    return Err(SagaError::NotCancellable { order_id, status });
                }
                Err(e) => return Err(e.into()),
            }

            match self.inner.store.save(&order).await {
                Ok(()) => {
                    info!(%order_id, status = %order.status(), "Cancellation requested");
                    return Ok(order);
                }
                Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    metrics::counter!("saga_version_conflicts_total").increment(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Starts a driver for every order that has not finished.
    ///
    /// Returns the number of orders resumed.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self) -> Result<usize> {
        let orders = self.inner.store.load_non_terminal().await?;
        let count = orders.len();
        for order in orders {
            info!(order_id = %order.id(), status = %order.status(), "Resuming saga");
            self.spawn_driver(order).await;
        }
        Ok(count)
    }

    /// Polls the store until the order is `Completed` or `Cancelled`.
    pub async fn wait_for_terminal(&self, order_id: OrderId, timeout: Duration) -> Result<Order> {
        // None waits without limit.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let order = self
                .inner
                .store
                .load(order_id)
                .await?
                .ok_or(SagaError::OrderNotFound(order_id))?;
            if order.is_terminal() {
                return Ok(order);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(SagaError::WaitTimeout(order_id));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Returns the number of drivers still running.
    pub async fn in_flight(&self) -> usize {
        self.inner
            .drivers
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Aborts every running driver.
    ///
    /// Orders stay in whatever status they last saved and are picked up by
    /// [`resume`](Self::resume).
    pub async fn shutdown(&self) {
        let drivers: Vec<_> = self.inner.drivers.lock().await.drain().collect();
        let mut aborted = 0;
        for (_, handle) in drivers {
            if !handle.is_finished() {
                aborted += 1;
            }
            handle.abort();
        }
        info!(aborted, "Saga drivers stopped");
    }

    async fn spawn_driver(&self, order: Order) {
        let order_id = order.id();
        let mut drivers = self.inner.drivers.lock().await;
        drivers.retain(|_, handle| !handle.is_finished());
        if drivers.contains_key(&order_id) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.drive(order).await });
        drivers.insert(order_id, handle);
    }
}

impl<S, I, P> Inner<S, I, P>
where
    S: OrderStore,
    I: InventoryService,
    P: PaymentService,
{
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn drive(&self, order: Order) {
        let started = Instant::now();
        match self.run(order).await {
            Ok(Some(order)) => {
                let duration = started.elapsed().as_secs_f64();
                metrics::histogram!("saga_duration_seconds").record(duration);
                match order.cancel_reason() {
                    Some(reason) if order.status() == OrderStatus::Cancelled => {
                        metrics::counter!("saga_cancelled_total", "reason" => reason.as_str())
                            .increment(1);
                        warn!(reason = reason.as_str(), duration, "Saga cancelled");
                    }
                    _ => {
                        metrics::counter!("saga_completed_total").increment(1);
                        info!(duration, "Saga completed");
                    }
                }
            }
            Ok(None) => warn!("Saga yielded to another writer"),
            Err(e) => error!(error = %e, "Saga driver stopped"),
        }
    }

    /// Steps the order until it is terminal.
    ///
    /// Version conflicts and store failures reload the order and step again.
    /// Returns None if the order vanished or kept conflicting with another
    /// writer.
    async fn run(&self, mut order: Order) -> Result<Option<Order>> {
        let order_id = order.id();
        let mut conflicts = 0;
        let mut store_failures: u32 = 0;

        while !order.is_terminal() {
            match self.step(&mut order).await {
                Ok(()) => {
                    conflicts = 0;
                    store_failures = 0;
                }
                Err(e) if e.is_conflict() => {
                    conflicts += 1;
                    metrics::counter!("saga_version_conflicts_total").increment(1);
                    warn!(%order_id, conflicts, "Version conflict; reloading order");
                    if conflicts > MAX_CONFLICT_RETRIES {
                        return Ok(None);
                    }
                    order = match self.reload(order_id).await? {
                        Some(fresh) => fresh,
                        None => return Ok(None),
                    };
                }
                Err(e) if e.is_store_failure() => {
                    store_failures = store_failures.saturating_add(1);
                    metrics::counter!("saga_store_failures_total").increment(1);
                    if store_failures > MAX_STORE_RETRIES && !must_finish(order.status()) {
                        return Err(e);
                    }
                    warn!(%order_id, status = %order.status(), store_failures, error = %e, "Order store failed; retrying");
                    tokio::time::sleep(self.policy.delay_for_attempt(store_failures - 1)).await;
                    // A failed load keeps the last saved copy; a stale copy
                    // surfaces as a version conflict on the next save.
                    match self.store.load(order_id).await {
                        Ok(Some(fresh)) => order = fresh,
                        Ok(None) => return Ok(None),
                        Err(e) => warn!(%order_id, error = %e, "Reload failed"),
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(order))
    }

    /// Loads the order after a conflict, waiting out store failures.
    async fn reload(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut failures = 0;
        loop {
            match self.store.load(order_id).await {
                Ok(found) => return Ok(found),
                Err(e) if failures < MAX_STORE_RETRIES => {
                    failures += 1;
                    warn!(%order_id, failures, error = %e, "Reload failed; retrying");
                    tokio::time::sleep(self.policy.delay_for_attempt(failures - 1)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Performs the work for the order's current status and saves the result.
    async fn step(&self, order: &mut Order) -> Result<()> {
        if order.cancel_requested()
            && let Some(next) = cancellation_target(order.status())
        {
            info!(order_id = %order.id(), from = %order.status(), "Acting on cancellation request");
            return self
                .persist(order, |o| o.fail(next, CancelReason::CancelledByBuyer, None))
                .await;
        }

        match order.status() {
            OrderStatus::Pending => {
                self.persist(order, |o| o.advance(OrderStatus::Reserving, None))
                    .await
            }
            OrderStatus::Reserving => self.reserve_all(order).await,
            OrderStatus::Reserved => {
                self.persist(order, |o| o.advance(OrderStatus::Authorizing, None))
                    .await
            }
            OrderStatus::Authorizing => self.authorize(order).await,
            OrderStatus::Authorized => {
                self.persist(order, |o| o.advance(OrderStatus::Capturing, None))
                    .await
            }
            OrderStatus::Capturing => self.capture(order).await,
            OrderStatus::ReservationFailed
            | OrderStatus::AuthorizationFailed
            | OrderStatus::CaptureFailed => self.compensate(order).await,
            OrderStatus::Completed | OrderStatus::Cancelled => Ok(()),
        }
    }

    /// Applies `change` to a copy of the order and saves it. The caller's
    /// order is only replaced once the save succeeds.
    async fn persist(
        &self,
        order: &mut Order,
        change: impl FnOnce(&mut Order) -> std::result::Result<(), OrderError>,
    ) -> Result<()> {
        let mut next = order.clone();
        change(&mut next)?;
        self.store.save(&next).await?;
        *order = next;
        Ok(())
    }

    async fn reserve_all(&self, order: &mut Order) -> Result<()> {
        let order_id = order.id();
        let items: Vec<LineItem> = order.line_items().to_vec();

        for item in &items {
            let target = item.product_id.as_str();
            let key = &IdempotencyKey::for_reservation(order_id, &item.product_id);
            let inventory = &self.inventory;

            let call = self
                .call_step(
                    Step::ReserveInventory,
                    Some(self.policy.max_attempts),
                    || inventory.reserve(order_id, &item.product_id, item.quantity, key),
                    || async move {
                        inventory
                            .get_reservation(key)
                            .await
                            .map(|found| found.map(ReserveOutcome::Held))
                    },
                )
                .await;

            let failure = match call {
                StepCall::Done {
                    value: ReserveOutcome::Held(reservation),
                    attempts,
                } if reservation.status != ReservationStatus::Released => {
                    if !has_succeeded(order, Step::ReserveInventory, Some(target)) {
                        let record =
                            StepRecord::new(Step::ReserveInventory, attempts, StepOutcome::Succeeded)
                                .with_target(target);
                        self.persist(order, |o| o.record(record)).await?;
                    }
                    continue;
                }
                StepCall::Done {
                    value: ReserveOutcome::Held(_),
                    attempts,
                } => (
                    CancelReason::ReservationExpired,
                    StepRecord::new(
                        Step::ReserveInventory,
                        attempts,
                        StepOutcome::Failed("reservation already released".to_string()),
                    ),
                ),
                StepCall::Done {
                    value:
                        ReserveOutcome::InsufficientStock {
                            requested,
                            available,
                        },
                    attempts,
                } => {
                    warn!(%order_id, product_id = target, requested, available, "Insufficient stock");
                    (
                        CancelReason::InsufficientStock,
                        StepRecord::new(
                            Step::ReserveInventory,
                            attempts,
                            StepOutcome::Declined(CancelReason::InsufficientStock.as_str().to_string()),
                        ),
                    )
                }
                StepCall::Rejected { reason, attempts } => (
                    CancelReason::InsufficientStock,
                    StepRecord::new(Step::ReserveInventory, attempts, StepOutcome::Failed(reason)),
                ),
                StepCall::Exhausted { attempts } => (
                    CancelReason::TimeoutExceeded,
                    StepRecord::new(Step::ReserveInventory, attempts, StepOutcome::TimedOut),
                ),
            };

            let (reason, record) = failure;
            return self
                .persist(order, |o| {
                    o.fail(
                        OrderStatus::ReservationFailed,
                        reason,
                        Some(record.with_target(target)),
                    )
                })
                .await;
        }

        info!(%order_id, items = items.len(), "All line items reserved");
        self.persist(order, |o| o.advance(OrderStatus::Reserved, None))
            .await
    }

    async fn authorize(&self, order: &mut Order) -> Result<()> {
        let order_id = order.id();
        let key = &IdempotencyKey::for_payment(order_id);
        let amount = order.total();
        let payment = &self.payment;

        let call = self
            .call_step(
                Step::AuthorizePayment,
                Some(self.policy.max_attempts),
                || payment.authorize(key, amount),
                || async move {
                    payment
                        .get_intent(key)
                        .await
                        .map(|found| found.map(authorization_from_intent))
                },
            )
            .await;

        match call {
            StepCall::Done {
                value: AuthorizeOutcome::Authorized(_),
                attempts,
            } => {
                let record =
                    StepRecord::new(Step::AuthorizePayment, attempts, StepOutcome::Succeeded);
                self.persist(order, |o| o.advance(OrderStatus::Authorized, Some(record)))
                    .await
            }
            StepCall::Done {
                value: AuthorizeOutcome::Declined { reason },
                attempts,
            } => {
                warn!(%order_id, reason = %reason, "Payment declined");
                let record =
                    StepRecord::new(Step::AuthorizePayment, attempts, StepOutcome::Declined(reason));
                self.persist(order, |o| {
                    o.fail(
                        OrderStatus::AuthorizationFailed,
                        CancelReason::PaymentDeclined,
                        Some(record),
                    )
                })
                .await
            }
            StepCall::Rejected { reason, attempts } => {
                let record =
                    StepRecord::new(Step::AuthorizePayment, attempts, StepOutcome::Failed(reason));
                self.persist(order, |o| {
                    o.fail(
                        OrderStatus::AuthorizationFailed,
                        CancelReason::PaymentDeclined,
                        Some(record),
                    )
                })
                .await
            }
            StepCall::Exhausted { attempts } => {
                let record =
                    StepRecord::new(Step::AuthorizePayment, attempts, StepOutcome::TimedOut);
                self.persist(order, |o| {
                    o.fail(
                        OrderStatus::AuthorizationFailed,
                        CancelReason::TimeoutExceeded,
                        Some(record),
                    )
                })
                .await
            }
        }
    }

    async fn capture(&self, order: &mut Order) -> Result<()> {
        let order_id = order.id();
        let key = &IdempotencyKey::for_payment(order_id);
        let payment = &self.payment;

        let call = self
            .call_step(
                Step::CapturePayment,
                Some(self.policy.max_attempts),
                || payment.capture(key),
                || async move {
                    payment
                        .get_intent(key)
                        .await
                        .map(|found| found.and_then(capture_from_intent))
                },
            )
            .await;

        let (reason, record) = match call {
            StepCall::Done {
                value: CaptureOutcome::Captured(_),
                attempts,
            } => {
                if !has_succeeded(order, Step::CapturePayment, None) {
                    let record =
                        StepRecord::new(Step::CapturePayment, attempts, StepOutcome::Succeeded);
                    self.persist(order, |o| o.record(record)).await?;
                }
                return self.commit_all(order).await;
            }
            StepCall::Done {
                value: CaptureOutcome::Failed { reason },
                attempts,
            } => (
                CancelReason::CaptureFailed,
                StepRecord::new(Step::CapturePayment, attempts, StepOutcome::Declined(reason)),
            ),
            StepCall::Rejected { reason, attempts } => (
                CancelReason::CaptureFailed,
                StepRecord::new(Step::CapturePayment, attempts, StepOutcome::Failed(reason)),
            ),
            StepCall::Exhausted { attempts } => (
                CancelReason::TimeoutExceeded,
                StepRecord::new(Step::CapturePayment, attempts, StepOutcome::TimedOut),
            ),
        };

        warn!(%order_id, reason = reason.as_str(), "Capture failed");
        self.persist(order, |o| {
            o.fail(OrderStatus::CaptureFailed, reason, Some(record))
        })
        .await
    }

    /// Commits every reservation once the payment is captured.
    async fn commit_all(&self, order: &mut Order) -> Result<()> {
        let order_id = order.id();
        let items: Vec<LineItem> = order.line_items().to_vec();
        let inventory = &self.inventory;

        for item in &items {
            let target = item.product_id.as_str();
            if has_succeeded(order, Step::CommitInventory, Some(target)) {
                continue;
            }
            let key = &IdempotencyKey::for_reservation(order_id, &item.product_id);

            let call = self
                .call_step(
                    Step::CommitInventory,
                    None,
                    || inventory.commit(key),
                    || async move {
                        inventory.get_reservation(key).await.map(|found| {
                            found.filter(|r| r.status == ReservationStatus::Committed)
                        })
                    },
                )
                .await;

            match call {
                StepCall::Done { attempts, .. } => {
                    let record =
                        StepRecord::new(Step::CommitInventory, attempts, StepOutcome::Succeeded)
                            .with_target(target);
                    self.persist(order, |o| o.record(record)).await?;
                }
                StepCall::Rejected { reason, attempts } => {
                    error!(%order_id, product_id = target, reason = %reason, "Reservation lost after capture");
                    let record = StepRecord::new(
                        Step::CommitInventory,
                        attempts,
                        StepOutcome::Failed(reason),
                    )
                    .with_target(target);
                    return self
                        .persist(order, |o| {
                            o.fail(
                                OrderStatus::CaptureFailed,
                                CancelReason::ReservationExpired,
                                Some(record),
                            )
                        })
                        .await;
                }
                // Unbounded calls only return once answered; step again from Capturing.
                StepCall::Exhausted { .. } => return Ok(()),
            }
        }

        info!(%order_id, "Reservations committed");
        self.persist(order, |o| o.advance(OrderStatus::Completed, None))
            .await
    }

    /// Undoes whatever the order holds downstream, then cancels it.
    ///
    /// Payment is settled first, then every line item's reservation is
    /// released. Each call is retried until acknowledged.
    async fn compensate(&self, order: &mut Order) -> Result<()> {
        let order_id = order.id();
        info!(%order_id, status = %order.status(), reason = ?order.cancel_reason(), "Compensating");

        if matches!(
            order.status(),
            OrderStatus::AuthorizationFailed | OrderStatus::CaptureFailed
        ) && !has_succeeded(order, Step::VoidPayment, None)
            && !has_succeeded(order, Step::RefundPayment, None)
        {
            let record = self.settle_payment(order_id).await;
            self.persist(order, |o| o.record(record)).await?;
        }

        let items: Vec<LineItem> = order.line_items().to_vec();
        let inventory = &self.inventory;
        for item in &items {
            let target = item.product_id.as_str();
            if has_succeeded(order, Step::ReleaseInventory, Some(target)) {
                continue;
            }
            let key = &IdempotencyKey::for_reservation(order_id, &item.product_id);

            let call = self
                .call_step(
                    Step::ReleaseInventory,
                    None,
                    || inventory.release(key),
                    || async move {
                        inventory.get_reservation(key).await.map(|found| {
                            found
                                .filter(|r| r.status == ReservationStatus::Released)
                                .map(|_| ())
                        })
                    },
                )
                .await;

            let outcome = match call {
                StepCall::Done { attempts, .. } => (attempts, StepOutcome::Succeeded),
                StepCall::Rejected { reason, attempts } => {
                    warn!(%order_id, product_id = target, reason = %reason, "Release refused; leaving reservation as is");
                    (attempts, StepOutcome::Failed(reason))
                }
                StepCall::Exhausted { attempts } => (attempts, StepOutcome::TimedOut),
            };
            let record = StepRecord::new(Step::ReleaseInventory, outcome.0, outcome.1)
                .with_target(target);
            self.persist(order, |o| o.record(record)).await?;
        }

        self.persist(order, |o| o.advance(OrderStatus::Cancelled, None))
            .await
    }

    /// Voids the order's payment, or refunds it if it was already captured.
    async fn settle_payment(&self, order_id: OrderId) -> StepRecord {
        let key = &IdempotencyKey::for_payment(order_id);
        let payment = &self.payment;

        let voided = self
            .call_step(
                Step::VoidPayment,
                None,
                || payment.void(key),
                || async move {
                    payment.get_intent(key).await.map(|found| {
                        found.and_then(|intent| {
                            matches!(intent.status, IntentStatus::Voided | IntentStatus::Failed)
                                .then_some(())
                        })
                    })
                },
            )
            .await;

        match voided {
            StepCall::Done { attempts, .. } => {
                StepRecord::new(Step::VoidPayment, attempts, StepOutcome::Succeeded)
            }
            StepCall::Exhausted { attempts } => {
                StepRecord::new(Step::VoidPayment, attempts, StepOutcome::TimedOut)
            }
            StepCall::Rejected { reason, .. } => {
                warn!(%order_id, reason = %reason, "Payment already captured; refunding");
                let refunded = self
                    .call_step(
                        Step::RefundPayment,
                        None,
                        || payment.refund(key),
                        || async move {
                            payment.get_intent(key).await.map(|found| {
                                found.and_then(|intent| {
                                    (intent.status == IntentStatus::Refunded).then_some(())
                                })
                            })
                        },
                    )
                    .await;
                match refunded {
                    StepCall::Done { attempts, .. } => {
                        StepRecord::new(Step::RefundPayment, attempts, StepOutcome::Succeeded)
                    }
                    StepCall::Rejected { reason, attempts } => {
                        error!(%order_id, reason = %reason, "Refund refused");
                        StepRecord::new(Step::RefundPayment, attempts, StepOutcome::Failed(reason))
                    }
                    StepCall::Exhausted { attempts } => {
                        StepRecord::new(Step::RefundPayment, attempts, StepOutcome::TimedOut)
                    }
                }
            }
        }
    }

    /// Calls a downstream service until it answers.
    ///
    /// Each attempt is bounded by the step timeout. After a timeout or a
    /// transient error the outcome is unknown, so the service is re-queried by
    /// key before the call is retried with backoff. With no attempt limit the
    /// call is retried until the service answers.
    async fn call_step<T, C, CF, Q, QF>(
        &self,
        step: Step,
        max_attempts: Option<u32>,
        mut call: C,
        mut requery: Q,
    ) -> StepCall<T>
    where
        C: FnMut() -> CF,
        CF: Future<Output = std::result::Result<T, ServiceError>>,
        Q: FnMut() -> QF,
        QF: Future<Output = std::result::Result<Option<T>, ServiceError>>,
    {
        let policy = &self.policy;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let error = match tokio::time::timeout(policy.step_timeout, call()).await {
                Ok(Ok(value)) => {
                    return StepCall::Done {
                        value,
                        attempts: attempt,
                    };
                }
                Ok(Err(ServiceError::Rejected(reason))) => {
                    return StepCall::Rejected {
                        reason,
                        attempts: attempt,
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => ServiceError::Timeout,
            };
            warn!(step = step.as_str(), attempt, error = %error, "Step outcome unknown");

            if let Ok(Ok(Some(value))) =
                tokio::time::timeout(policy.step_timeout, requery()).await
            {
                info!(step = step.as_str(), attempt, "Outcome recovered by re-query");
                return StepCall::Done {
                    value,
                    attempts: attempt,
                };
            }

            if max_attempts.is_some_and(|max| attempt >= max) {
                warn!(step = step.as_str(), attempts = attempt, "Attempts exhausted");
                return StepCall::Exhausted { attempts: attempt };
            }

            metrics::counter!("saga_step_retries_total", "step" => step.as_str()).increment(1);
            tokio::time::sleep(policy.delay_for_attempt(attempt - 1)).await;
        }
    }
}

/// True once the order may hold a payment authorization, or is undoing
/// downstream work. Authorizations never expire, so such orders never stop on
/// a store failure.
fn must_finish(status: OrderStatus) -> bool {
    matches!(
        status,
        OrderStatus::Authorizing
            | OrderStatus::Authorized
            | OrderStatus::Capturing
            | OrderStatus::ReservationFailed
            | OrderStatus::AuthorizationFailed
            | OrderStatus::CaptureFailed
    )
}

/// The status a cancellation request moves an order to, if it can be honoured.
fn cancellation_target(status: OrderStatus) -> Option<OrderStatus> {
    match status {
        OrderStatus::Pending => Some(OrderStatus::Cancelled),
        OrderStatus::Reserving | OrderStatus::Reserved => Some(OrderStatus::ReservationFailed),
        OrderStatus::Authorizing | OrderStatus::Authorized => {
            Some(OrderStatus::AuthorizationFailed)
        }
        _ => None,
    }
}

/// The authorize outcome a stored intent stands for.
fn authorization_from_intent(intent: PaymentIntent) -> AuthorizeOutcome {
    if intent.authorized_at.is_some() {
        return AuthorizeOutcome::Authorized(intent);
    }
    AuthorizeOutcome::Declined {
        reason: intent.reason.unwrap_or_default(),
    }
}

/// The capture outcome a stored intent stands for, if capture has settled.
fn capture_from_intent(intent: PaymentIntent) -> Option<CaptureOutcome> {
    let status = intent.status;
    match status {
        IntentStatus::Captured => Some(CaptureOutcome::Captured(intent)),
        IntentStatus::Failed | IntentStatus::Voided => Some(CaptureOutcome::Failed {
            reason: intent
                .reason
                .unwrap_or_else(|| status.as_str().to_string()),
        }),
        IntentStatus::Authorized | IntentStatus::Refunded => None,
    }
}

/// Returns true if the order already records a successful `step` for `target`.
fn has_succeeded(order: &Order, step: Step, target: Option<&str>) -> bool {
    order.steps().iter().any(|record| {
        record.step == step && record.outcome.is_success() && record.target.as_deref() == target
    })
}
