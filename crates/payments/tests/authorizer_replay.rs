//! Replay and concurrency tests for the payment authorizer.

use common::{IdempotencyKey, Money, OrderId};
use payments::{AuthorizeOutcome, CaptureOutcome, IntentStatus, PaymentAuthorizer};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_authorize_with_one_key_creates_one_intent() {
    let authorizer = PaymentAuthorizer::default();
    let key = IdempotencyKey::for_payment(OrderId::new());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let authorizer = authorizer.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            authorizer
                .authorize(&key, Money::from_cents(2500))
                .await
                .unwrap()
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(authorizer.intent_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_captures_assign_one_transaction() {
    let authorizer = PaymentAuthorizer::default();
    let key = IdempotencyKey::for_payment(OrderId::new());
    authorizer
        .authorize(&key, Money::from_cents(2500))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let authorizer = authorizer.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move { authorizer.capture(&key).await.unwrap() }));
    }

    let mut transactions = Vec::new();
    for handle in handles {
        let CaptureOutcome::Captured(intent) = handle.await.unwrap() else {
            panic!("expected capture");
        };
        transactions.push(intent.transaction_id);
    }
    transactions.dedup();
    assert_eq!(transactions.len(), 1);
}

#[tokio::test]
async fn void_racing_authorize_never_leaves_live_authorization() {
    for _ in 0..50 {
        let authorizer = PaymentAuthorizer::default();
        let key = IdempotencyKey::for_payment(OrderId::new());

        let (authorize, void) = tokio::join!(
            authorizer.authorize(&key, Money::from_cents(100)),
            authorizer.void(&key),
        );
        authorize.unwrap();
        void.unwrap();

        // Whatever order they ran in, a second void settles it.
        authorizer.void(&key).await.unwrap();
        if let Some(intent) = authorizer.get_intent(&key).await {
            assert_ne!(intent.status, IntentStatus::Authorized);
        }
        assert!(!matches!(
            authorizer.capture(&key).await.unwrap(),
            CaptureOutcome::Captured(_)
        ));
    }
}

#[tokio::test]
async fn full_lifecycle_through_refund() {
    let authorizer = PaymentAuthorizer::default();
    let key = IdempotencyKey::for_payment(OrderId::new());

    let outcome = authorizer
        .authorize(&key, Money::from_cents(999))
        .await
        .unwrap();
    assert!(matches!(outcome, AuthorizeOutcome::Authorized(_)));
    authorizer.capture(&key).await.unwrap();
    authorizer.refund(&key).await.unwrap();

    let intent = authorizer.get_intent(&key).await.unwrap();
    assert_eq!(intent.status, IntentStatus::Refunded);
    assert!(intent.transaction_id.is_some());
    assert!(authorizer.void(&key).await.is_err());
}
