//! Saga coordinator for the order fulfillment saga.

use std::time::Instant;

use common::OrderId;
use domain::{
    NewOrder, Order, OrderFailure, OrderOutcome, OrderStatus, SagaFailure, SagaStep,
    UpstreamError,
};
use order_store::{Claim, IdempotencyStore, OrderStore, OrderStoreExt, StoreError};

use crate::compensation::CompensationEngine;
use crate::context::SagaContext;
use crate::error::{Result, SagaError};
use crate::guard::IdempotencyGuard;
use crate::policy::CallPolicy;
use crate::services::inventory::InventoryService;
use crate::services::payment::PaymentService;
use crate::services::shipping::{ShipmentRequest, ShippingService};

/// Orchestrates the execution of order fulfillment sagas.
///
/// The coordinator drives a 3-step saga (inventory → payment → shipping),
/// persisting the order after every step so that a failure, or a crash, can
/// be compensated from the last checkpoint.
pub struct SagaCoordinator<S, K, I, P, Sh> {
    store: S,
    guard: IdempotencyGuard<K>,
    inventory: I,
    payment: P,
    shipping: Sh,
    policy: CallPolicy,
    compensation: CompensationEngine<S, I, P>,
}

impl<S, K, I, P, Sh> SagaCoordinator<S, K, I, P, Sh>
where
    S: OrderStore + Clone,
    K: IdempotencyStore,
    I: InventoryService + Clone,
    P: PaymentService + Clone,
    Sh: ShippingService,
{
    /// Creates a new saga coordinator with the default call policies.
    pub fn new(store: S, idempotency: K, inventory: I, payment: P, shipping: Sh) -> Self {
        let compensation = CompensationEngine::new(
            store.clone(),
            inventory.clone(),
            payment.clone(),
            CallPolicy::compensation(),
        );
        Self {
            store,
            guard: IdempotencyGuard::new(idempotency),
            inventory,
            payment,
            shipping,
            policy: CallPolicy::forward(),
            compensation,
        }
    }

    /// Replaces the forward and compensation call policies.
    pub fn with_policies(mut self, forward: CallPolicy, compensation: CallPolicy) -> Self {
        self.policy = forward;
        self.compensation = CompensationEngine::new(
            self.store.clone(),
            self.inventory.clone(),
            self.payment.clone(),
            compensation,
        );
        self
    }

    pub fn guard(&self) -> &IdempotencyGuard<K> {
        &self.guard
    }

    /// Creates an order and drives its saga to a terminal state.
    ///
    /// With an idempotency key, a completed earlier request is replayed
    /// without any downstream call, and the outcome of this one is recorded
    /// before returning. A failed saga comes back as
    /// [`SagaError::StepFailed`] after compensation has run.
    #[tracing::instrument(skip(self, new_order), fields(order_id))]
    pub async fn create_order(
        &self,
        new_order: NewOrder,
        idempotency_key: Option<String>,
    ) -> Result<Order> {
        let order_id = OrderId::new();
        tracing::Span::current().record("order_id", tracing::field::display(order_id));

        if let Some(key) = idempotency_key.as_deref() {
            match self.guard.begin(key, order_id).await? {
                Claim::Acquired => {}
                Claim::InFlight { order_id } => {
                    return Err(SagaError::IdempotencyInProgress {
                        key: key.to_string(),
                        order_id,
                    });
                }
                Claim::Completed(outcome) => return into_result(*outcome),
            }
        }

        let key = idempotency_key.as_deref();
        let mut order =
            Order::create(order_id, new_order).with_idempotency_key(idempotency_key.clone());
        if let Err(err) = self.store.save(&mut order).await {
            self.release_claim(key).await;
            return Err(err.into());
        }

        let outcome = match self.execute(order).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.release_claim(key).await;
                return Err(err);
            }
        };

        if let Some(key) = key
            && let Err(err) = self.guard.record(key, &outcome).await
        {
            self.release_claim(Some(key)).await;
            return Err(err);
        }
        into_result(outcome)
    }

    /// Drops an idempotency claim whose request ended without an outcome,
    /// so the client can retry with the same key.
    async fn release_claim(&self, key: Option<&str>) {
        if let Some(key) = key
            && let Err(err) = self.guard.release(key).await
        {
            tracing::warn!(key, error = %err, "Failed to release idempotency claim");
        }
    }

    /// Loads an order by ID.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    /// Runs the remaining steps of a persisted order.
    async fn execute(&self, order: Order) -> Result<OrderOutcome> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();
        let mut ctx = SagaContext::new(order);

        while let Some(step) = ctx.next_step() {
            tracing::info!(%step, "saga step started");

            match self.run_step(step, ctx.order()).await {
                Ok(external_id) => {
                    let checkpoint = match ctx.commit(step, external_id) {
                        Ok(()) => self
                            .store
                            .checkpoint(ctx.order_mut())
                            .await
                            .map_err(SagaError::from),
                        Err(err) => Err(err.into()),
                    };
                    match checkpoint {
                        Ok(()) => tracing::info!(%step, "saga step completed"),
                        Err(err) if ctx.order().status() == OrderStatus::Shipped => {
                            // Everything is committed downstream; completion
                            // below writes the order again.
                            tracing::warn!(%step, error = %err, "saga checkpoint failed");
                        }
                        Err(err) => {
                            let err = self.abandon(ctx.into_order(), step, err).await;
                            metrics::histogram!("saga_duration_seconds")
                                .record(saga_start.elapsed().as_secs_f64());
                            return Err(err);
                        }
                    }
                }
                Err(upstream) => {
                    let outcome = self.abort(ctx.into_order(), step, upstream).await;
                    metrics::histogram!("saga_duration_seconds")
                        .record(saga_start.elapsed().as_secs_f64());
                    return outcome;
                }
            }
        }

        let mut order = ctx.into_order();
        order.complete()?;
        if let Err(err) = self.store.checkpoint(&mut order).await {
            // Recovery completes orders left in `shipped`.
            tracing::error!(order_id = %order.id(), error = %err, "Completed order was not persisted");
        }

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        metrics::counter!("saga_completed").increment(1);
        tracing::info!(order_id = %order.id(), duration, "saga completed successfully");

        Ok(OrderOutcome::Completed(order))
    }

    async fn run_step(
        &self,
        step: SagaStep,
        order: &Order,
    ) -> std::result::Result<String, UpstreamError> {
        let order_id = order.id();
        match step {
            SagaStep::ReserveInventory => self
                .policy
                .call("inventory", "reserve", || {
                    self.inventory.reserve(order_id, order.items())
                })
                .await
                .map(|r| r.reservation_id),
            SagaStep::AuthorizePayment => {
                let total = order.total();
                self.policy
                    .call("payment", "authorize", || {
                        self.payment.authorize(order_id, total, order.currency())
                    })
                    .await
                    .map(|r| r.transaction_id)
            }
            SagaStep::CreateShipment => {
                // Shipping only runs once the reservation is checkpointed.
                let request = ShipmentRequest {
                    order_id,
                    address: order.address().clone(),
                    reservation_id: order.reservation_id().unwrap_or_default().to_string(),
                    items: order.items().to_vec(),
                };
                self.policy
                    .call("shipping", "create_shipment", || {
                        self.shipping.create_shipment(&request)
                    })
                    .await
                    .map(|r| r.shipment_id)
            }
        }
    }

    /// Rolls back after the order itself could not be written, so nothing
    /// stays reserved or charged. Returns the error that stopped the saga.
    async fn abandon(&self, mut order: Order, step: SagaStep, err: SagaError) -> SagaError {
        tracing::error!(order_id = %order.id(), %step, error = %err, "saga checkpoint failed, compensating");
        metrics::counter!("saga_failed").increment(1);

        match self.compensation.compensate(&mut order, None).await {
            Ok(report) => tracing::warn!(
                order_id = %order.id(),
                compensation = ?report.status,
                "saga abandoned"
            ),
            Err(comp_err) => tracing::error!(
                order_id = %order.id(),
                error = %comp_err,
                "saga abandoned with compensation unpersisted"
            ),
        }
        err
    }

    /// Compensates after a failed step and builds the failure descriptor.
    async fn abort(
        &self,
        mut order: Order,
        step: SagaStep,
        upstream: UpstreamError,
    ) -> Result<OrderOutcome> {
        tracing::warn!(order_id = %order.id(), %step, error = %upstream, "saga step failed");

        let failure = OrderFailure {
            failed_step: step,
            upstream: upstream.clone(),
        };
        let compensation = self.compensation.compensate(&mut order, Some(failure)).await?;

        metrics::counter!("saga_failed").increment(1);
        tracing::warn!(
            order_id = %order.id(),
            status = %order.status(),
            "saga failed"
        );

        Ok(OrderOutcome::Failed(SagaFailure {
            order_id: order.id(),
            failed_step: step,
            upstream,
            compensation,
            order_status: order.status(),
        }))
    }

    /// Drives every non-terminal order left by an earlier process to a
    /// terminal state. Returns the orders it touched.
    ///
    /// Orders that fail to recover are logged and left for the next run.
    pub async fn recover_incomplete(&self) -> Result<Vec<Order>> {
        let orders = self.store.list_by_status(&OrderStatus::in_flight()).await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(count = orders.len(), "Recovering interrupted orders");
        let mut recovered = Vec::with_capacity(orders.len());
        for order in orders {
            let order_id = order.id();
            match self.recover(order).await {
                Ok(order) => recovered.push(order),
                Err(err) => tracing::error!(%order_id, error = %err, "Order recovery failed"),
            }
        }
        Ok(recovered)
    }

    /// Drives one order to a terminal state from its last checkpoint.
    pub async fn recover_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        self.recover(order).await
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id(), status = %order.status()))]
    async fn recover(&self, mut order: Order) -> Result<Order> {
        if order.is_terminal() {
            return Ok(order);
        }

        let outcome = if order.status() == OrderStatus::Shipped {
            // Every step committed; only the final transition was lost.
            order.complete()?;
            self.store.save(&mut order).await?;
            metrics::counter!("saga_completed").increment(1);
            OrderOutcome::Completed(order.clone())
        } else {
            let failure = order
                .failure()
                .cloned()
                .unwrap_or_else(|| interrupted_failure(&order));
            let compensation = self
                .compensation
                .compensate(&mut order, Some(failure.clone()))
                .await?;
            metrics::counter!("saga_failed").increment(1);
            OrderOutcome::Failed(SagaFailure {
                order_id: order.id(),
                failed_step: failure.failed_step,
                upstream: failure.upstream,
                compensation,
                order_status: order.status(),
            })
        };

        if let Some(key) = order.idempotency_key() {
            match self.guard.record(key, &outcome).await {
                Ok(_) => {}
                Err(SagaError::Store(StoreError::UnclaimedKey(_))) => {
                    tracing::warn!(key, "Recovered order had no idempotency claim");
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(status = %order.status(), "Order recovered");
        Ok(order)
    }
}

/// Failure recorded for an order whose saga stopped without an error, i.e.
/// the process died while the next step was in flight.
fn interrupted_failure(order: &Order) -> OrderFailure {
    let step = SagaStep::ALL
        .get(order.committed_steps().len())
        .copied()
        .unwrap_or(SagaStep::CreateShipment);
    OrderFailure {
        failed_step: step,
        upstream: UpstreamError::unavailable(
            step.service(),
            None,
            "saga interrupted before the step completed",
        ),
    }
}

/// Turns a recorded outcome back into the result the caller sees.
fn into_result(outcome: OrderOutcome) -> Result<Order> {
    match outcome {
        OrderOutcome::Completed(order) => Ok(order),
        OrderOutcome::Failed(failure) => Err(SagaError::StepFailed(Box::new(failure))),
    }
}
