//! Idempotency record persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::OrderOutcome;
use serde::{Deserialize, Serialize};

use crate::{OrderId, Result};

/// A stored idempotency key.
///
/// Created once by [`IdempotencyStore::claim`] with no outcome, then
/// completed exactly once by the claimer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub order_id: OrderId,
    pub outcome: Option<OrderOutcome>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn new(key: impl Into<String>, order_id: OrderId) -> Self {
        Self {
            key: key.into(),
            order_id,
            outcome: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Returns true once an outcome has been recorded.
    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Result of an atomic check-and-set on an idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The caller now owns the key and must run the saga.
    Acquired,
    /// Another request owns the key and has not finished yet.
    InFlight { order_id: OrderId },
    /// The key already has a recorded outcome.
    Completed(Box<OrderOutcome>),
}

/// Core trait for idempotency key persistence.
///
/// `claim` must be atomic: of any number of concurrent claims for one key,
/// exactly one returns `Acquired`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claims `key` for `order_id` if nobody holds it.
    async fn claim(&self, key: &str, order_id: OrderId) -> Result<Claim>;

    /// Records the outcome of a claimed key.
    ///
    /// First writer wins: returns `false` without touching the record if an
    /// outcome is already stored. Fails with `UnclaimedKey` if the key was
    /// never claimed.
    async fn complete(&self, key: &str, outcome: &OrderOutcome) -> Result<bool>;

    /// Returns the record for `key`, if any.
    async fn lookup(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Drops a claim that never produced an order, so the client may retry.
    /// Completed records are never removed.
    async fn release(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T: IdempotencyStore + ?Sized> IdempotencyStore for Arc<T> {
    async fn claim(&self, key: &str, order_id: OrderId) -> Result<Claim> {
        (**self).claim(key, order_id).await
    }

    async fn complete(&self, key: &str, outcome: &OrderOutcome) -> Result<bool> {
        (**self).complete(key, outcome).await
    }

    async fn lookup(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        (**self).lookup(key).await
    }

    async fn release(&self, key: &str) -> Result<()> {
        (**self).release(key).await
    }
}
