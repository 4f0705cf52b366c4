//! Order record and its lifecycle transitions.

use chrono::{DateTime, Utc};
use common::{OrderId, Version};
use serde::{Deserialize, Serialize};

use crate::validation::NewOrder;

use super::{
    Address, CommittedStep, Currency, LineItem, Money, OrderError, OrderFailure, OrderStatus,
    SagaStep,
};

/// Order record.
///
/// Represents one customer purchase attempt from creation through either
/// completion or compensation. Every transition is guarded by
/// [`OrderStatus`]; the saga orchestrator persists the record after each one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    user_id: Option<String>,
    address: Address,
    currency: Currency,
    items: Vec<LineItem>,
    status: OrderStatus,

    reservation_id: Option<String>,
    payment_id: Option<String>,
    shipment_id: Option<String>,

    /// Why the saga stopped, if it did.
    #[serde(default)]
    failure: Option<OrderFailure>,

    /// Steps whose inverse has already succeeded.
    #[serde(default)]
    compensated_steps: Vec<SagaStep>,

    /// Client idempotency key this order was created under, if any.
    #[serde(default)]
    idempotency_key: Option<String>,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a pending order from a validated request.
    pub fn create(id: OrderId, new_order: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id,
            version: Version::initial(),
            user_id: new_order.user_id,
            address: new_order.address,
            currency: new_order.currency,
            items: new_order.items,
            status: OrderStatus::Pending,
            reservation_id: None,
            payment_id: None,
            shipment_id: None,
            failure: None,
            compensated_steps: Vec::new(),
            idempotency_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tags the order with the idempotency key it was created under.
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Sets the version after a successful write. Only stores call this.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn reservation_id(&self) -> Option<&str> {
        self.reservation_id.as_deref()
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn shipment_id(&self) -> Option<&str> {
        self.shipment_id.as_deref()
    }

    pub fn failure(&self) -> Option<&OrderFailure> {
        self.failure.as_ref()
    }

    pub fn compensated_steps(&self) -> &[SagaStep] {
        &self.compensated_steps
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the order total (sum of qty * price).
    pub fn total(&self) -> Money {
        self.items.iter().map(LineItem::total_price).sum()
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the steps committed downstream, in execution order.
    ///
    /// Derived from the recorded identifiers, so it survives a restart.
    pub fn committed_steps(&self) -> Vec<CommittedStep> {
        let ids = [
            (SagaStep::ReserveInventory, &self.reservation_id),
            (SagaStep::AuthorizePayment, &self.payment_id),
            (SagaStep::CreateShipment, &self.shipment_id),
        ];
        ids.into_iter()
            .filter_map(|(step, id)| id.as_ref().map(|id| CommittedStep::new(step, id.clone())))
            .collect()
    }

    /// Returns true if the inverse of `step` already succeeded.
    pub fn is_step_compensated(&self, step: SagaStep) -> bool {
        self.compensated_steps.contains(&step)
    }

    /// Committed steps with an inverse that has not run successfully yet.
    pub fn unresolved_steps(&self) -> Vec<SagaStep> {
        self.committed_steps()
            .into_iter()
            .map(|c| c.step)
            .filter(|step| step.has_inverse() && !self.is_step_compensated(*step))
            .collect()
    }
}

// Transition methods
impl Order {
    fn guard(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action,
            })
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Records the inventory reservation.
    pub fn mark_reserved(&mut self, reservation_id: impl Into<String>) -> Result<(), OrderError> {
        self.guard(self.status.can_reserve(), "mark reserved")?;
        self.reservation_id = Some(reservation_id.into());
        self.status = OrderStatus::Reserved;
        self.touch();
        Ok(())
    }

    /// Records the payment authorization.
    pub fn mark_paid(&mut self, payment_id: impl Into<String>) -> Result<(), OrderError> {
        self.guard(self.status.can_pay(), "mark paid")?;
        self.payment_id = Some(payment_id.into());
        self.status = OrderStatus::Paid;
        self.touch();
        Ok(())
    }

    /// Records the shipment.
    pub fn mark_shipped(&mut self, shipment_id: impl Into<String>) -> Result<(), OrderError> {
        self.guard(self.status.can_ship(), "mark shipped")?;
        self.shipment_id = Some(shipment_id.into());
        self.status = OrderStatus::Shipped;
        self.touch();
        Ok(())
    }

    /// Completes the order.
    pub fn complete(&mut self) -> Result<(), OrderError> {
        self.guard(self.status.can_complete(), "complete")?;
        self.status = OrderStatus::Completed;
        self.touch();
        Ok(())
    }

    /// Moves the order to `compensating`.
    ///
    /// Resuming an order already compensating keeps its recorded failure
    /// unless a new one is supplied.
    pub fn begin_compensation(&mut self, failure: Option<OrderFailure>) -> Result<(), OrderError> {
        self.guard(self.status.can_compensate(), "begin compensation")?;
        if failure.is_some() {
            self.failure = failure;
        }
        self.status = OrderStatus::Compensating;
        self.touch();
        Ok(())
    }

    /// Checkpoints a successful inverse call.
    pub fn record_compensated(&mut self, step: SagaStep) -> Result<(), OrderError> {
        self.guard(
            self.status == OrderStatus::Compensating,
            "record compensation",
        )?;
        if !self.compensated_steps.contains(&step) {
            self.compensated_steps.push(step);
        }
        self.touch();
        Ok(())
    }

    /// Marks a compensating order as cleanly rolled back.
    pub fn mark_compensated(&mut self) -> Result<(), OrderError> {
        self.guard(
            self.status == OrderStatus::Compensating,
            "mark compensated",
        )?;
        if !self.unresolved_steps().is_empty() {
            return Err(OrderError::UncompensatedSteps {
                steps: self.unresolved_steps(),
            });
        }
        self.status = OrderStatus::Compensated;
        self.touch();
        Ok(())
    }

    /// Marks the order failed, from `pending` (nothing committed) or
    /// `compensating` (an inverse call did not succeed).
    pub fn fail(&mut self, failure: Option<OrderFailure>) -> Result<(), OrderError> {
        self.guard(self.status.can_fail(), "fail")?;
        if failure.is_some() {
            self.failure = failure;
        }
        self.status = OrderStatus::Failed;
        self.touch();
        Ok(())
    }
}
