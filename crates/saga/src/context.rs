//! Saga execution context.

use domain::{CommittedStep, Order, OrderError, SagaStep};

/// Per-call view of a running saga: the order, what has been committed so
/// far and what is still left to run.
///
/// Lives for one orchestration call. Everything it knows is derivable from
/// the persisted order, so a fresh context can be rebuilt after a crash.
#[derive(Debug, Clone)]
pub struct SagaContext {
    order: Order,
    committed: Vec<CommittedStep>,
}

impl SagaContext {
    pub fn new(order: Order) -> Self {
        let committed = order.committed_steps();
        Self { order, committed }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn order_mut(&mut self) -> &mut Order {
        &mut self.order
    }

    pub fn into_order(self) -> Order {
        self.order
    }

    /// Steps already committed, in execution order.
    pub fn committed(&self) -> &[CommittedStep] {
        &self.committed
    }

    /// Steps not yet committed, in execution order.
    pub fn pending(&self) -> impl Iterator<Item = SagaStep> + '_ {
        SagaStep::ALL
            .into_iter()
            .filter(|step| !self.committed.iter().any(|c| c.step == *step))
    }

    pub fn next_step(&self) -> Option<SagaStep> {
        self.pending().next()
    }

    /// Records a successful step on the order.
    pub fn commit(&mut self, step: SagaStep, external_id: String) -> Result<(), OrderError> {
        match step {
            SagaStep::ReserveInventory => self.order.mark_reserved(external_id.clone())?,
            SagaStep::AuthorizePayment => self.order.mark_paid(external_id.clone())?,
            SagaStep::CreateShipment => self.order.mark_shipped(external_id.clone())?,
        }
        self.committed.push(CommittedStep::new(step, external_id));
        Ok(())
    }
}
