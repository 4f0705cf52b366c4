use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{Order, OrderOutcome, OrderStatus};
use tokio::sync::RwLock;

use crate::{
    OrderId, Result, StoreError, Version,
    idempotency::{Claim, IdempotencyRecord, IdempotencyStore},
    store::OrderStore,
};

/// In-memory order store implementation.
///
/// Provides the same interface and conflict semantics as the PostgreSQL
/// implementation. Used by tests and by the service when no database is
/// configured.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Clears all orders.
    pub async fn clear(&self) {
        self.orders.write().await.clear();
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(StoreError::AlreadyExists(order.id()));
        }

        let mut stored = order.clone();
        stored.set_version(Version::first());
        orders.insert(order.id(), stored);
        Ok(Version::first())
    }

    async fn update(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        let current = orders
            .get_mut(&order.id())
            .ok_or(StoreError::NotFound(order.id()))?;

        if current.version() != order.version() {
            return Err(StoreError::ConcurrencyConflict {
                order_id: order.id(),
                expected: order.version(),
                actual: current.version(),
            });
        }

        let next = order.version().next();
        let mut stored = order.clone();
        stored.set_version(next);
        *current = stored;
        Ok(next)
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<_> = orders
            .values()
            .filter(|o| statuses.contains(&o.status()))
            .cloned()
            .collect();
        matching.sort_by_key(|o| o.created_at());
        Ok(matching)
    }
}

/// In-memory idempotency store implementation.
///
/// The write lock makes `claim` a single check-and-set.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    /// Creates a new empty in-memory idempotency store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys held.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, order_id: OrderId) -> Result<Claim> {
        let mut records = self.records.write().await;
        match records.get(key) {
            Some(record) => Ok(match &record.outcome {
                Some(outcome) => Claim::Completed(Box::new(outcome.clone())),
                None => Claim::InFlight {
                    order_id: record.order_id,
                },
            }),
            None => {
                records.insert(key.to_string(), IdempotencyRecord::new(key, order_id));
                Ok(Claim::Acquired)
            }
        }
    }

    async fn complete(&self, key: &str, outcome: &OrderOutcome) -> Result<bool> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| StoreError::UnclaimedKey(key.to_string()))?;

        if record.is_completed() {
            return Ok(false);
        }

        record.outcome = Some(outcome.clone());
        record.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn lookup(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn release(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if records.get(key).is_some_and(|r| !r.is_completed()) {
            records.remove(key);
        }
        Ok(())
    }
}
