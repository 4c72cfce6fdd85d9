//! The payment authorizer.

use std::collections::HashMap;
use std::sync::Arc;

use common::{IdempotencyKey, Money};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::intent::{AuthorizeOutcome, CaptureOutcome, IntentStatus, PaymentIntent};

/// Decline and failure reasons reported by the authorizer.
pub mod decline {
    /// The amount was zero or negative.
    pub const INVALID_AMOUNT: &str = "invalid_amount";
    /// The amount was above the configured limit.
    pub const LIMIT_EXCEEDED: &str = "limit_exceeded";
    /// The key was voided before it was authorized or captured.
    pub const VOIDED: &str = "voided";
    /// The issuer refused the charge.
    pub const CARD_DECLINED: &str = "card_declined";
    /// The processor rejected the capture.
    pub const PROCESSOR_ERROR: &str = "processor_error";
    /// The intent was already refunded.
    pub const REFUNDED: &str = "refunded";
}

/// Authorizer configuration.
#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    /// Largest amount that will be authorized.
    pub max_amount: Money,
    /// Method recorded on intents when the caller does not name one.
    pub default_method: String,
}

impl Default for AuthorizerConfig {
    fn default() -> Self {
        Self {
            max_amount: Money::from_cents(1_000_000),
            default_method: "card".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Intent(PaymentIntent),
    /// Voided before any authorize arrived.
    Tombstone,
}

#[derive(Debug, Default)]
struct AuthorizerState {
    entries: HashMap<IdempotencyKey, Entry>,
    decline_all: bool,
    fail_on_capture: bool,
}

/// In-process payment authorizer.
///
/// Clones share the same intents.
#[derive(Debug, Clone)]
pub struct PaymentAuthorizer {
    config: Arc<AuthorizerConfig>,
    state: Arc<RwLock<AuthorizerState>>,
}

impl Default for PaymentAuthorizer {
    fn default() -> Self {
        Self::new(AuthorizerConfig::default())
    }
}

impl PaymentAuthorizer {
    /// Creates an authorizer with no intents.
    pub fn new(config: AuthorizerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(AuthorizerState::default())),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AuthorizerConfig {
        &self.config
    }

    /// Makes every new authorization decline with `card_declined`.
    pub async fn set_decline_all(&self, decline: bool) {
        self.state.write().await.decline_all = decline;
    }

    /// Makes every new capture fail with `processor_error`.
    pub async fn set_fail_on_capture(&self, fail: bool) {
        self.state.write().await.fail_on_capture = fail;
    }

    /// Authorizes `amount` under `key` using the default payment method.
    pub async fn authorize(&self, key: &IdempotencyKey, amount: Money) -> Result<AuthorizeOutcome> {
        let method = self.config.default_method.clone();
        self.authorize_with_method(key, amount, &method).await
    }

    /// Authorizes `amount` under `key`.
    ///
    /// The first call decides the outcome; replays with the same amount
    /// return it again.
    #[tracing::instrument(skip(self), fields(key = %key, amount = %amount))]
    pub async fn authorize_with_method(
        &self,
        key: &IdempotencyKey,
        amount: Money,
        method: &str,
    ) -> Result<AuthorizeOutcome> {
        let mut state = self.state.write().await;

        let decline_reason = match state.entries.get(key) {
            Some(Entry::Intent(intent)) => {
                if intent.amount != amount {
                    return Err(PaymentError::AmountMismatch {
                        key: key.clone(),
                        recorded: intent.amount,
                        requested: amount,
                    });
                }
                metrics::counter!("payment_authorizations_total", "result" => "replayed")
                    .increment(1);
                return Ok(replay_authorization(intent));
            }
            Some(Entry::Tombstone) => Some(decline::VOIDED),
            None if !amount.is_positive() => Some(decline::INVALID_AMOUNT),
            None if amount > self.config.max_amount => Some(decline::LIMIT_EXCEEDED),
            None if state.decline_all => Some(decline::CARD_DECLINED),
            None => None,
        };

        let intent = match decline_reason {
            Some(reason) => PaymentIntent::new(
                key.clone(),
                amount,
                method,
                IntentStatus::Failed,
                Some(reason.to_string()),
            ),
            None => PaymentIntent::new(key.clone(), amount, method, IntentStatus::Authorized, None),
        };
        state
            .entries
            .insert(key.clone(), Entry::Intent(intent.clone()));

        let outcome = replay_authorization(&intent);
        metrics::counter!("payment_authorizations_total", "result" => outcome.label()).increment(1);
        match &outcome {
            AuthorizeOutcome::Authorized(_) => info!("Payment authorized"),
            AuthorizeOutcome::Declined { reason } => warn!(reason = %reason, "Payment declined"),
        }
        Ok(outcome)
    }

    /// Captures a previously authorized intent.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn capture(&self, key: &IdempotencyKey) -> Result<CaptureOutcome> {
        let mut state = self.state.write().await;
        let fail_on_capture = state.fail_on_capture;

        let intent = match state.entries.get_mut(key) {
            Some(Entry::Intent(intent)) => intent,
            Some(Entry::Tombstone) => {
                return Ok(CaptureOutcome::Failed {
                    reason: decline::VOIDED.to_string(),
                });
            }
            None => return Err(PaymentError::NotFound { key: key.clone() }),
        };

        let outcome = match intent.status {
            IntentStatus::Captured => CaptureOutcome::Captured(intent.clone()),
            IntentStatus::Authorized if fail_on_capture => {
                intent.reason = Some(decline::PROCESSOR_ERROR.to_string());
                intent.transition(IntentStatus::Failed);
                warn!("Capture failed");
                CaptureOutcome::Failed {
                    reason: decline::PROCESSOR_ERROR.to_string(),
                }
            }
            IntentStatus::Authorized => {
                intent.transaction_id = Some(format!("txn_{}", Uuid::new_v4().simple()));
                intent.transition(IntentStatus::Captured);
                metrics::counter!("payment_captures_total").increment(1);
                info!(transaction_id = ?intent.transaction_id, "Payment captured");
                CaptureOutcome::Captured(intent.clone())
            }
            IntentStatus::Voided => CaptureOutcome::Failed {
                reason: decline::VOIDED.to_string(),
            },
            IntentStatus::Refunded => CaptureOutcome::Failed {
                reason: decline::REFUNDED.to_string(),
            },
            IntentStatus::Failed => CaptureOutcome::Failed {
                reason: intent
                    .reason
                    .clone()
                    .unwrap_or_else(|| decline::PROCESSOR_ERROR.to_string()),
            },
        };
        Ok(outcome)
    }

    /// Cancels an authorization.
    ///
    /// Voiding twice is a no-op, as is voiding a failed intent. Voiding a key
    /// that was never authorized leaves a tombstone so a late authorize
    /// declines.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn void(&self, key: &IdempotencyKey) -> Result<Option<PaymentIntent>> {
        let mut state = self.state.write().await;

        if !state.entries.contains_key(key) {
            state.entries.insert(key.clone(), Entry::Tombstone);
            info!("Voided unknown key; tombstone recorded");
            return Ok(None);
        }
        let Some(Entry::Intent(intent)) = state.entries.get_mut(key) else {
            return Ok(None);
        };

        match intent.status {
            IntentStatus::Captured | IntentStatus::Refunded => {
                return Err(PaymentError::AlreadyCaptured { key: key.clone() });
            }
            IntentStatus::Authorized => {
                intent.transition(IntentStatus::Voided);
                info!("Payment voided");
            }
            IntentStatus::Voided | IntentStatus::Failed => {}
        }
        Ok(Some(intent.clone()))
    }

    /// Returns captured funds.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn refund(&self, key: &IdempotencyKey) -> Result<PaymentIntent> {
        let mut state = self.state.write().await;

        let Some(Entry::Intent(intent)) = state.entries.get_mut(key) else {
            return Err(PaymentError::NotFound { key: key.clone() });
        };

        match intent.status {
            IntentStatus::Refunded => {}
            IntentStatus::Captured => {
                intent.transition(IntentStatus::Refunded);
                metrics::counter!("payment_refunds_total").increment(1);
                warn!("Payment refunded");
            }
            status => {
                return Err(PaymentError::NotCaptured {
                    key: key.clone(),
                    status,
                });
            }
        }
        Ok(intent.clone())
    }

    /// Looks up the intent recorded under a key.
    pub async fn get_intent(&self, key: &IdempotencyKey) -> Option<PaymentIntent> {
        match self.state.read().await.entries.get(key) {
            Some(Entry::Intent(intent)) => Some(intent.clone()),
            _ => None,
        }
    }

    /// Returns the number of intents recorded.
    pub async fn intent_count(&self) -> usize {
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| matches!(entry, Entry::Intent(_)))
            .count()
    }
}

/// The authorize outcome an intent stands for.
fn replay_authorization(intent: &PaymentIntent) -> AuthorizeOutcome {
    if intent.authorized_at.is_some() {
        return AuthorizeOutcome::Authorized(intent.clone());
    }
    AuthorizeOutcome::Declined {
        reason: intent
            .reason
            .clone()
            .unwrap_or_else(|| decline::CARD_DECLINED.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> IdempotencyKey {
        IdempotencyKey::new(name)
    }

    #[tokio::test]
    async fn test_authorize_and_capture() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("order-1:payment");

        let outcome = authorizer
            .authorize(&k, Money::from_cents(5000))
            .await
            .unwrap();
        let AuthorizeOutcome::Authorized(intent) = outcome else {
            panic!("expected authorization");
        };
        assert_eq!(intent.status, IntentStatus::Authorized);
        assert_eq!(intent.method, "card");

        let CaptureOutcome::Captured(captured) = authorizer.capture(&k).await.unwrap() else {
            panic!("expected capture");
        };
        assert_eq!(captured.status, IntentStatus::Captured);
        assert!(captured.transaction_id.is_some());
    }

    #[tokio::test]
    async fn test_authorize_replay_returns_stored_outcome() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");

        let first = authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        let second = authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(authorizer.intent_count().await, 1);
    }

    #[tokio::test]
    async fn test_amount_mismatch() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();

        let result = authorizer.authorize(&k, Money::from_cents(200)).await;
        assert!(matches!(result, Err(PaymentError::AmountMismatch { .. })));
    }

    #[tokio::test]
    async fn test_decline_rules() {
        let authorizer = PaymentAuthorizer::new(AuthorizerConfig {
            max_amount: Money::from_cents(1000),
            ..Default::default()
        });

        let zero = authorizer.authorize(&key("a"), Money::zero()).await.unwrap();
        assert_eq!(
            zero,
            AuthorizeOutcome::Declined {
                reason: decline::INVALID_AMOUNT.to_string()
            }
        );

        let over = authorizer
            .authorize(&key("b"), Money::from_cents(1001))
            .await
            .unwrap();
        assert_eq!(
            over,
            AuthorizeOutcome::Declined {
                reason: decline::LIMIT_EXCEEDED.to_string()
            }
        );

        let at_limit = authorizer
            .authorize(&key("c"), Money::from_cents(1000))
            .await
            .unwrap();
        assert_eq!(at_limit.label(), "authorized");
    }

    #[tokio::test]
    async fn test_decline_is_replayed_even_after_toggle() {
        let authorizer = PaymentAuthorizer::default();
        authorizer.set_decline_all(true).await;
        let k = key("k");
        let first = authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        assert_eq!(first.label(), "declined");

        authorizer.set_decline_all(false).await;
        let second = authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_capture_is_idempotent() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();

        let first = authorizer.capture(&k).await.unwrap();
        let second = authorizer.capture(&k).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_capture_unknown_key() {
        let authorizer = PaymentAuthorizer::default();
        assert!(matches!(
            authorizer.capture(&key("missing")).await,
            Err(PaymentError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_capture_failure_is_recorded() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        authorizer.set_fail_on_capture(true).await;

        let outcome = authorizer.capture(&k).await.unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::Failed {
                reason: decline::PROCESSOR_ERROR.to_string()
            }
        );

        authorizer.set_fail_on_capture(false).await;
        assert_eq!(authorizer.capture(&k).await.unwrap(), outcome);

        // The authorization itself still replays as authorized.
        let replay = authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        assert_eq!(replay.label(), "authorized");

        let intent = authorizer.void(&k).await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Failed);
    }

    #[tokio::test]
    async fn test_void_then_capture_fails() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();

        let voided = authorizer.void(&k).await.unwrap().unwrap();
        assert_eq!(voided.status, IntentStatus::Voided);
        authorizer.void(&k).await.unwrap();

        assert_eq!(
            authorizer.capture(&k).await.unwrap(),
            CaptureOutcome::Failed {
                reason: decline::VOIDED.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_void_captured_is_rejected() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        authorizer.capture(&k).await.unwrap();

        assert!(matches!(
            authorizer.void(&k).await,
            Err(PaymentError::AlreadyCaptured { .. })
        ));
    }

    #[tokio::test]
    async fn test_void_before_authorize_declines_late_authorize() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");

        assert!(authorizer.void(&k).await.unwrap().is_none());
        let outcome = authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();
        assert_eq!(
            outcome,
            AuthorizeOutcome::Declined {
                reason: decline::VOIDED.to_string()
            }
        );
        assert_eq!(
            authorizer.get_intent(&k).await.unwrap().status,
            IntentStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_refund_only_after_capture() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer.authorize(&k, Money::from_cents(100)).await.unwrap();

        assert!(matches!(
            authorizer.refund(&k).await,
            Err(PaymentError::NotCaptured {
                status: IntentStatus::Authorized,
                ..
            })
        ));

        authorizer.capture(&k).await.unwrap();
        let refunded = authorizer.refund(&k).await.unwrap();
        assert_eq!(refunded.status, IntentStatus::Refunded);
        assert_eq!(authorizer.refund(&k).await.unwrap().status, IntentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_custom_method_recorded() {
        let authorizer = PaymentAuthorizer::default();
        let k = key("k");
        authorizer
            .authorize_with_method(&k, Money::from_cents(100), "paypal")
            .await
            .unwrap();
        assert_eq!(authorizer.get_intent(&k).await.unwrap().method, "paypal");
    }
}
