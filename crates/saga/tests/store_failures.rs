//! Checkout sagas over an order store that fails some of its writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{BuyerId, IdempotencyKey, Money, OrderId, ProductId};
use domain::{CancelReason, LineItem, Order, OrderStatus};
use inventory::InventoryLedger;
use order_store::{InMemoryOrderStore, OrderStore, OrderStoreError};
use payments::{IntentStatus, PaymentAuthorizer};
use saga::{MAX_STORE_RETRIES, OrderSagaCoordinator, RetryPolicy};
use tokio::sync::Mutex;

const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFault {
    /// The write is refused.
    Refused,
    /// The write lands but the store reports an error.
    LostAck,
}

/// Wraps the in-memory store and fails saves that move an order into a
/// chosen status.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: InMemoryOrderStore,
    faults: Arc<Mutex<Vec<(OrderStatus, WriteFault, u32)>>>,
    failed_saves: Arc<AtomicU32>,
}

impl FlakyStore {
    async fn fail_saves_into(&self, status: OrderStatus, fault: WriteFault, times: u32) {
        self.faults.lock().await.push((status, fault, times));
    }

    async fn heal(&self) {
        self.faults.lock().await.clear();
    }

    fn failed_saves(&self) -> u32 {
        self.failed_saves.load(Ordering::SeqCst)
    }

    async fn take_fault(&self, status: OrderStatus) -> Option<WriteFault> {
        let mut faults = self.faults.lock().await;
        let (_, fault, remaining) = faults
            .iter_mut()
            .find(|(s, _, remaining)| *s == status && *remaining > 0)?;
        *remaining -= 1;
        self.failed_saves.fetch_add(1, Ordering::SeqCst);
        Some(*fault)
    }
}

fn store_error() -> OrderStoreError {
    OrderStoreError::Serialization(
        serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
    )
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn save(&self, order: &Order) -> order_store::Result<()> {
        match self.take_fault(order.status()).await {
            None => self.inner.save(order).await,
            Some(WriteFault::Refused) => Err(store_error()),
            Some(WriteFault::LostAck) => {
                self.inner.save(order).await?;
                Err(store_error())
            }
        }
    }

    async fn load(&self, order_id: OrderId) -> order_store::Result<Option<Order>> {
        self.inner.load(order_id).await
    }

    async fn load_non_terminal(&self) -> order_store::Result<Vec<Order>> {
        self.inner.load_non_terminal().await
    }

    async fn list(&self, limit: usize) -> order_store::Result<Vec<Order>> {
        self.inner.list(limit).await
    }
}

type TestCoordinator = OrderSagaCoordinator<FlakyStore, InventoryLedger, PaymentAuthorizer>;

struct TestHarness {
    coordinator: TestCoordinator,
    store: FlakyStore,
    ledger: InventoryLedger,
    authorizer: PaymentAuthorizer,
}

impl TestHarness {
    async fn new() -> Self {
        let ledger = InventoryLedger::default();
        ledger.set_stock(&ProductId::new("P"), 5).await.unwrap();
        Self::with_parts(FlakyStore::default(), ledger, PaymentAuthorizer::default())
    }

    fn with_parts(store: FlakyStore, ledger: InventoryLedger, authorizer: PaymentAuthorizer) -> Self {
        let coordinator = OrderSagaCoordinator::new(
            store.clone(),
            ledger.clone(),
            authorizer.clone(),
            RetryPolicy {
                max_attempts: 3,
                step_timeout: Duration::from_millis(100),
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
            },
        );
        Self {
            coordinator,
            store,
            ledger,
            authorizer,
        }
    }

    fn restarted(&self) -> Self {
        Self::with_parts(
            self.store.clone(),
            self.ledger.clone(),
            self.authorizer.clone(),
        )
    }

    async fn checkout(&self, quantity: u32) -> OrderId {
        self.coordinator
            .start_checkout(
                BuyerId::new(),
                vec![LineItem::new("P", quantity, Money::from_cents(400))],
            )
            .await
            .unwrap()
    }

    async fn finish(&self, order_id: OrderId) -> Order {
        self.coordinator
            .wait_for_terminal(order_id, FINISH_TIMEOUT)
            .await
            .unwrap()
    }

    async fn intent_status(&self, order_id: OrderId) -> Option<IntentStatus> {
        self.authorizer
            .get_intent(&IdempotencyKey::for_payment(order_id))
            .await
            .map(|intent| intent.status)
    }

    async fn held(&self) -> u32 {
        self.ledger.level(&ProductId::new("P")).await.unwrap().held
    }
}

#[tokio::test]
async fn test_refused_save_into_capturing_is_retried() {
    let h = TestHarness::new().await;
    h.store
        .fail_saves_into(OrderStatus::Capturing, WriteFault::Refused, 1)
        .await;

    let order_id = h.checkout(3).await;
    let order = h.finish(order_id).await;

    assert_eq!(order.status(), OrderStatus::Completed);
    assert_eq!(h.store.failed_saves(), 1);
    assert_eq!(h.intent_status(order_id).await, Some(IntentStatus::Captured));
    assert_eq!(h.held().await, 0);
    assert_eq!(
        h.ledger.level(&ProductId::new("P")).await.unwrap().committed,
        3
    );
}

#[tokio::test]
async fn test_save_that_landed_without_ack_is_reconciled() {
    let h = TestHarness::new().await;
    h.store
        .fail_saves_into(OrderStatus::Reserved, WriteFault::LostAck, 1)
        .await;

    let order_id = h.checkout(2).await;
    let order = h.finish(order_id).await;

    assert_eq!(order.status(), OrderStatus::Completed);
    assert_eq!(h.authorizer.intent_count().await, 1);
    assert_eq!(h.held().await, 0);
}

#[tokio::test]
async fn test_compensation_outlasts_store_outage() {
    let h = TestHarness::new().await;
    h.authorizer.set_decline_all(true).await;
    h.store
        .fail_saves_into(
            OrderStatus::Cancelled,
            WriteFault::Refused,
            MAX_STORE_RETRIES + 5,
        )
        .await;

    let order_id = h.checkout(2).await;
    let order = h.finish(order_id).await;

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.cancel_reason(), Some(CancelReason::PaymentDeclined));
    assert_eq!(h.store.failed_saves(), MAX_STORE_RETRIES + 5);
    assert_eq!(h.held().await, 0);
}

#[tokio::test]
async fn test_order_holding_no_payment_stops_and_resumes() {
    let h = TestHarness::new().await;
    h.store
        .fail_saves_into(OrderStatus::Reserving, WriteFault::Refused, u32::MAX)
        .await;

    let order_id = h.checkout(1).await;
    let deadline = tokio::time::Instant::now() + FINISH_TIMEOUT;
    while h.coordinator.in_flight().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "driver never stopped");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stored = h.store.load(order_id).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Pending);
    assert_eq!(h.store.failed_saves(), MAX_STORE_RETRIES + 1);
    assert_eq!(h.intent_status(order_id).await, None);

    h.store.heal().await;
    let restarted = h.restarted();
    assert_eq!(restarted.coordinator.resume().await.unwrap(), 1);
    let order = restarted.finish(order_id).await;
    assert_eq!(order.status(), OrderStatus::Completed);
}
