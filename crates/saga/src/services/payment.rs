//! Payment service trait and its authorizer-backed implementation.

use async_trait::async_trait;
use common::{IdempotencyKey, Money};
use payments::{AuthorizeOutcome, CaptureOutcome, PaymentAuthorizer, PaymentError, PaymentIntent};

use crate::error::ServiceError;

/// Trait for payment operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Holds funds for an order.
    async fn authorize(
        &self,
        key: &IdempotencyKey,
        amount: Money,
    ) -> Result<AuthorizeOutcome, ServiceError>;

    /// Takes the held funds.
    async fn capture(&self, key: &IdempotencyKey) -> Result<CaptureOutcome, ServiceError>;

    /// Cancels an authorization.
    async fn void(&self, key: &IdempotencyKey) -> Result<(), ServiceError>;

    /// Returns captured funds.
    async fn refund(&self, key: &IdempotencyKey) -> Result<(), ServiceError>;

    /// Looks up an intent by key.
    async fn get_intent(&self, key: &IdempotencyKey)
    -> Result<Option<PaymentIntent>, ServiceError>;
}

fn rejected(err: PaymentError) -> ServiceError {
    ServiceError::Rejected(err.to_string())
}

#[async_trait]
impl PaymentService for PaymentAuthorizer {
    async fn authorize(
        &self,
        key: &IdempotencyKey,
        amount: Money,
    ) -> Result<AuthorizeOutcome, ServiceError> {
        PaymentAuthorizer::authorize(self, key, amount)
            .await
            .map_err(rejected)
    }

    async fn capture(&self, key: &IdempotencyKey) -> Result<CaptureOutcome, ServiceError> {
        PaymentAuthorizer::capture(self, key).await.map_err(rejected)
    }

    async fn void(&self, key: &IdempotencyKey) -> Result<(), ServiceError> {
        PaymentAuthorizer::void(self, key)
            .await
            .map(|_| ())
            .map_err(rejected)
    }

    async fn refund(&self, key: &IdempotencyKey) -> Result<(), ServiceError> {
        PaymentAuthorizer::refund(self, key)
            .await
            .map(|_| ())
            .map_err(rejected)
    }

    async fn get_intent(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<PaymentIntent>, ServiceError> {
        Ok(PaymentAuthorizer::get_intent(self, key).await)
    }
}
