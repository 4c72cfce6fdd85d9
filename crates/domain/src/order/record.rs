//! The order record.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{BuyerId, Money, OrderId, ProductId, Version};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;

use super::{CancelReason, CheckoutResult, OrderStatus, StepRecord};

/// Maximum number of line items a single checkout may carry.
pub const MAX_LINE_ITEMS: usize = 100;

/// An item in an order, with its price snapshotted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit at checkout time.
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns `quantity * unit_price`, or `None` on overflow.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// An order driven through checkout by the saga coordinator.
///
/// Every mutating method bumps the version by exactly one, so each call maps
/// to one durable save. Terminal orders reject all mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    buyer_id: BuyerId,
    line_items: Vec<LineItem>,
    total: Money,
    status: OrderStatus,
    version: Version,
    steps: Vec<StepRecord>,
    cancel_reason: Option<CancelReason>,
    #[serde(default)]
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

// Construction
impl Order {
    /// Validates a checkout and creates the order in `Pending` at version 1.
    pub fn place(
        id: OrderId,
        buyer_id: BuyerId,
        line_items: Vec<LineItem>,
    ) -> Result<Order, OrderError> {
        if line_items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if line_items.len() > MAX_LINE_ITEMS {
            return Err(OrderError::TooManyItems {
                count: line_items.len(),
                max: MAX_LINE_ITEMS,
            });
        }

        let mut seen = HashSet::with_capacity(line_items.len());
        let mut total = Money::zero();
        for item in &line_items {
            if item.product_id.as_str().trim().is_empty() {
                return Err(OrderError::EmptyProductId);
            }
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.clone(),
                    price: item.unit_price.cents(),
                });
            }
            if !seen.insert(&item.product_id) {
                return Err(OrderError::DuplicateProduct {
                    product_id: item.product_id.clone(),
                });
            }
            total = item
                .subtotal()
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or(OrderError::TotalOverflow)?;
        }

        let now = Utc::now();
        Ok(Order {
            id,
            buyer_id,
            line_items,
            total,
            status: OrderStatus::Pending,
            version: Version::first(),
            steps: Vec::new(),
            cancel_reason: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        })
    }
}

// Query methods
impl Order {
    /// Returns the order ID.
    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Returns the buyer ID.
    pub fn buyer_id(&self) -> BuyerId {
        self.buyer_id
    }

    /// Returns the line items in checkout order.
    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    /// Returns the total amount fixed at checkout.
    pub fn total(&self) -> Money {
        self.total
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the current version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the step history, oldest first.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Returns the cancel reason, once a failure path was entered.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel_reason
    }

    /// Returns true if the buyer asked to cancel.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the result code surfaced to the checkout caller.
    pub fn result(&self) -> CheckoutResult {
        CheckoutResult::from_status(self.status, self.cancel_reason)
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the order was last mutated.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Mutation methods (each bumps the version by one)
impl Order {
    /// Moves to `next`, optionally recording the step that caused it.
    pub fn advance(
        &mut self,
        next: OrderStatus,
        step: Option<StepRecord>,
    ) -> Result<(), OrderError> {
        self.ensure_mutable()?;
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        if next == OrderStatus::Cancelled && self.cancel_reason.is_none() {
            self.cancel_reason = Some(CancelReason::CancelledByBuyer);
        }
        self.status = next;
        self.steps.extend(step);
        self.touch();
        Ok(())
    }

    /// Enters a failure path (or cancels a `Pending` order outright) with `reason`.
    pub fn fail(
        &mut self,
        next: OrderStatus,
        reason: CancelReason,
        step: Option<StepRecord>,
    ) -> Result<(), OrderError> {
        self.ensure_mutable()?;
        let direct_cancel = next == OrderStatus::Cancelled && self.status == OrderStatus::Pending;
        if !(next.is_failure() || direct_cancel) || !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.cancel_reason = Some(reason);
        self.status = next;
        self.steps.extend(step);
        self.touch();
        Ok(())
    }

    /// Appends a step record without changing status.
    pub fn record(&mut self, step: StepRecord) -> Result<(), OrderError> {
        self.ensure_mutable()?;
        self.steps.push(step);
        self.touch();
        Ok(())
    }

    /// Marks the order for cancellation by the buyer.
    ///
    /// Returns `Ok(false)` without touching the order when it is already on a
    /// failure path or a cancellation was already requested.
    pub fn request_cancel(&mut self) -> Result<bool, OrderError> {
        self.ensure_mutable()?;
        if self.status.is_failure() || self.cancel_requested {
            return Ok(false);
        }
        if !self.status.is_cancellable() {
            return Err(OrderError::NotCancellable {
                status: self.status,
            });
        }
        self.cancel_requested = true;
        self.touch();
        Ok(true)
    }

    fn ensure_mutable(&self) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::Terminal {
                status: self.status,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.version = self.version.next();
        self.updated_at = Utc::now();
    }
}
