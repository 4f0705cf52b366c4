//! Compensation engine: undoes committed saga steps in reverse order.

use domain::{
    CommittedStep, CompensationReport, Order, OrderFailure, OrderStatus, SagaStep, UpstreamError,
};
use order_store::{OrderStore, OrderStoreExt};

use crate::error::Result;
use crate::policy::CallPolicy;
use crate::services::inventory::InventoryService;
use crate::services::payment::PaymentService;

/// Issues inverse operations for the committed steps of a failed saga.
///
/// Every successful inverse is checkpointed on the order before the next
/// one runs, so re-running compensation (after a crash, or on an order
/// that is already compensated) never repeats a call.
#[derive(Debug, Clone)]
pub struct CompensationEngine<S, I, P> {
    store: S,
    inventory: I,
    payment: P,
    policy: CallPolicy,
}

impl<S, I, P> CompensationEngine<S, I, P>
where
    S: OrderStore,
    I: InventoryService,
    P: PaymentService,
{
    pub fn new(store: S, inventory: I, payment: P, policy: CallPolicy) -> Self {
        Self {
            store,
            inventory,
            payment,
            policy,
        }
    }

    /// Rolls back everything `order` has committed.
    ///
    /// Leaves the order `compensated` when every inverse succeeds, `failed`
    /// with the unresolved steps reported otherwise. Orders with nothing
    /// committed go straight to `failed`. Terminal orders are returned as
    /// they are, without calling any service.
    ///
    /// Every inverse is attempted even while the store is failing; a store
    /// error is returned only after the rollback has run.
    #[tracing::instrument(skip(self, order, failure), fields(order_id = %order.id()))]
    pub async fn compensate(
        &self,
        order: &mut Order,
        failure: Option<OrderFailure>,
    ) -> Result<CompensationReport> {
        match order.status() {
            OrderStatus::Compensated => return Ok(CompensationReport::completed()),
            OrderStatus::Failed => return Ok(Self::report_for(order)),
            OrderStatus::Completed => return Ok(CompensationReport::not_required()),
            _ => {}
        }

        let committed = order.committed_steps();
        if committed.is_empty() {
            order.fail(failure)?;
            self.store.checkpoint(order).await?;
            return Ok(CompensationReport::not_required());
        }

        if order.status() != OrderStatus::Compensating {
            order.begin_compensation(failure)?;
            self.persist(order).await;
        }

        tracing::info!(
            steps = committed.len(),
            already_compensated = order.compensated_steps().len(),
            "Compensation started"
        );

        for committed_step in committed.iter().rev() {
            let step = committed_step.step;
            if !step.has_inverse() || order.is_step_compensated(step) {
                continue;
            }

            match self.undo(committed_step).await {
                Ok(()) => {
                    order.record_compensated(step)?;
                    self.persist(order).await;
                    tracing::info!(%step, "Compensation step completed");
                }
                Err(err) => {
                    tracing::error!(%step, error = %err, "Compensation step failed");
                }
            }
        }

        let unresolved = order.unresolved_steps();
        if unresolved.is_empty() {
            order.mark_compensated()?;
            self.store.checkpoint(order).await?;
            tracing::info!("Order compensated");
            Ok(CompensationReport::completed())
        } else {
            order.fail(None)?;
            metrics::counter!("saga_compensation_failed").increment(1);
            self.store.checkpoint(order).await?;
            tracing::error!(?unresolved, "Compensation incomplete, order failed");
            Ok(CompensationReport::failed(unresolved))
        }
    }

    /// Writes an intermediate checkpoint. A failed write does not stop the
    /// remaining inverse calls; the final status write still reports it.
    async fn persist(&self, order: &mut Order) {
        if let Err(err) = self.store.checkpoint(order).await {
            tracing::error!(error = %err, "Compensation checkpoint failed");
        }
    }

    async fn undo(&self, committed: &CommittedStep) -> std::result::Result<(), UpstreamError> {
        let id = committed.external_id.as_str();
        match committed.step {
            SagaStep::ReserveInventory => {
                self.policy
                    .call("inventory", "release", || self.inventory.release(id))
                    .await
            }
            SagaStep::AuthorizePayment => {
                self.policy
                    .call("payment", "refund", || self.payment.refund(id))
                    .await
            }
            SagaStep::CreateShipment => Ok(()),
        }
    }

    fn report_for(order: &Order) -> CompensationReport {
        let unresolved = order.unresolved_steps();
        if !unresolved.is_empty() {
            CompensationReport::failed(unresolved)
        } else if order.compensated_steps().is_empty() {
            CompensationReport::not_required()
        } else {
            CompensationReport::completed()
        }
    }
}
