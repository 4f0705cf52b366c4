use std::sync::Arc;

use async_trait::async_trait;
use domain::{Order, OrderStatus};

use crate::{OrderId, Result, StoreError, Version};

/// Core trait for order persistence.
///
/// Writes are serialized per order with optimistic concurrency: an update
/// only lands if the stored version still equals the version the writer
/// loaded. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a brand-new order.
    ///
    /// Fails with `AlreadyExists` if the ID is taken. Returns the stored
    /// version (always [`Version::first`]).
    async fn insert(&self, order: &Order) -> Result<Version>;

    /// Replaces a stored order.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version differs from
    /// `order.version()`, and with `NotFound` if the order was never inserted.
    /// Returns the new version.
    async fn update(&self, order: &Order) -> Result<Version>;

    /// Loads an order by ID. Returns None if it doesn't exist.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists orders currently in any of the given statuses, oldest first.
    async fn list_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;
}

#[async_trait]
impl<T: OrderStore + ?Sized> OrderStore for Arc<T> {
    async fn insert(&self, order: &Order) -> Result<Version> {
        (**self).insert(order).await
    }

    async fn update(&self, order: &Order) -> Result<Version> {
        (**self).update(order).await
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        (**self).get(order_id).await
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        (**self).list_by_status(statuses).await
    }
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Inserts or updates the order and stamps the new version on it.
    async fn save(&self, order: &mut Order) -> Result<()> {
        let version = if order.version() == Version::initial() {
            self.insert(order).await?
        } else {
            self.update(order).await?
        };
        order.set_version(version);
        Ok(())
    }

    /// Saves a saga checkpoint, trying once more if the first write fails.
    ///
    /// The version is reloaded before the second attempt, since a write
    /// that reported an error may still have landed.
    async fn checkpoint(&self, order: &mut Order) -> Result<()> {
        let Err(err) = self.save(order).await else {
            return Ok(());
        };
        tracing::warn!(order_id = %order.id(), error = %err, "Checkpoint write failed, retrying");

        if let Some(stored) = self.get(order.id()).await? {
            order.set_version(stored.version());
        }
        self.save(order).await
    }

    /// Loads an order, failing with `NotFound` if it doesn't exist.
    async fn require(&self, order_id: OrderId) -> Result<Order> {
        self.get(order_id)
            .await?
            .ok_or(StoreError::NotFound(order_id))
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
