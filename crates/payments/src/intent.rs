//! Payment intents and call outcomes.

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, Money};
use serde::{Deserialize, Serialize};

/// Status of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Authorized,
    Captured,
    Voided,
    Failed,
    Refunded,
}

impl IntentStatus {
    /// Returns the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Authorized => "authorized",
            IntentStatus::Captured => "captured",
            IntentStatus::Voided => "voided",
            IntentStatus::Failed => "failed",
            IntentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment for one order, identified by its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub key: IdempotencyKey,
    pub amount: Money,
    pub status: IntentStatus,
    /// Payment method, e.g. `card`.
    pub method: String,
    /// Why the intent was declined or failed.
    pub reason: Option<String>,
    /// Processor reference, assigned on capture.
    pub transaction_id: Option<String>,
    /// When funds were first held. None for a declined intent.
    pub authorized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub(crate) fn new(
        key: IdempotencyKey,
        amount: Money,
        method: impl Into<String>,
        status: IntentStatus,
        reason: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            amount,
            status,
            method: method.into(),
            reason,
            transaction_id: None,
            authorized_at: (status == IntentStatus::Authorized).then_some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn transition(&mut self, status: IntentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Result of an authorize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AuthorizeOutcome {
    /// Funds are held. Carries the intent in its current status.
    Authorized(PaymentIntent),
    /// The authorizer refused.
    Declined { reason: String },
}

impl AuthorizeOutcome {
    /// Returns the label used for metrics and the HTTP surface.
    pub fn label(&self) -> &'static str {
        match self {
            AuthorizeOutcome::Authorized(_) => "authorized",
            AuthorizeOutcome::Declined { .. } => "declined",
        }
    }
}

/// Result of a capture call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Captured(PaymentIntent),
    Failed { reason: String },
}
