//! Idempotency guard in front of the saga.

use common::OrderId;
use domain::OrderOutcome;
use order_store::{Claim, IdempotencyStore};

use crate::error::Result;

/// Maps client idempotency keys to the outcome of the first request that
/// used them.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard<K> {
    store: K,
}

impl<K: IdempotencyStore> IdempotencyGuard<K> {
    pub fn new(store: K) -> Self {
        Self { store }
    }

    /// Atomically claims `key` for a new order, or reports who holds it.
    pub async fn begin(&self, key: &str, order_id: OrderId) -> Result<Claim> {
        let claim = self.store.claim(key, order_id).await?;
        match &claim {
            Claim::Acquired => tracing::debug!(key, %order_id, "Idempotency key claimed"),
            Claim::InFlight { order_id } => {
                tracing::info!(key, %order_id, "Idempotency key already in flight")
            }
            Claim::Completed(outcome) => {
                metrics::counter!("idempotency_replays_total").increment(1);
                tracing::info!(key, order_id = %outcome.order_id(), "Replaying recorded outcome");
            }
        }
        Ok(claim)
    }

    /// Returns the recorded outcome for `key`, if it has one.
    pub async fn lookup(&self, key: &str) -> Result<Option<OrderOutcome>> {
        Ok(self.store.lookup(key).await?.and_then(|record| record.outcome))
    }

    /// Records the outcome for a claimed key. The first recorded outcome wins.
    pub async fn record(&self, key: &str, outcome: &OrderOutcome) -> Result<bool> {
        let recorded = self.store.complete(key, outcome).await?;
        if !recorded {
            tracing::warn!(key, "Idempotency key already had an outcome; keeping the first");
        }
        Ok(recorded)
    }

    /// Gives up a claim whose order was never created.
    pub async fn release(&self, key: &str) -> Result<()> {
        self.store.release(key).await?;
        Ok(())
    }
}
