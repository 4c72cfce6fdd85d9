//! Records of the downstream calls an order made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A downstream call made on behalf of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Reserve stock for one line item.
    ReserveInventory,
    /// Authorize the order total.
    AuthorizePayment,
    /// Capture the authorized payment.
    CapturePayment,
    /// Turn a held reservation into a permanent decrement.
    CommitInventory,
    /// Compensation: give held stock back.
    ReleaseInventory,
    /// Compensation: void the payment intent.
    VoidPayment,
    /// Compensation: refund a captured payment.
    RefundPayment,
}

impl Step {
    /// Returns the step name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::ReserveInventory => "reserve_inventory",
            Step::AuthorizePayment => "authorize_payment",
            Step::CapturePayment => "capture_payment",
            Step::CommitInventory => "commit_inventory",
            Step::ReleaseInventory => "release_inventory",
            Step::VoidPayment => "void_payment",
            Step::RefundPayment => "refund_payment",
        }
    }

    /// Returns true for compensating steps.
    pub fn is_compensation(&self) -> bool {
        matches!(
            self,
            Step::ReleaseInventory | Step::VoidPayment | Step::RefundPayment
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The downstream service acknowledged the call.
    Succeeded,
    /// The downstream service refused for a business reason.
    Declined(String),
    /// The call failed in a way that will not succeed on retry.
    Failed(String),
    /// The attempt limit ran out without a known outcome.
    TimedOut,
}

impl StepOutcome {
    /// Returns true if the step succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded)
    }
}

/// One entry in an order's step history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which call this was.
    pub step: Step,
    /// The product this call concerned, for per-line-item steps.
    pub target: Option<String>,
    /// How many attempts were made, including the successful one.
    pub attempts: u32,
    /// The final outcome.
    pub outcome: StepOutcome,
    /// When the outcome was recorded.
    pub at: DateTime<Utc>,
}

impl StepRecord {
    /// Creates a record stamped with the current time.
    pub fn new(step: Step, attempts: u32, outcome: StepOutcome) -> Self {
        Self {
            step,
            target: None,
            attempts,
            outcome,
            at: Utc::now(),
        }
    }

    /// Attaches the product this step concerned.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}
