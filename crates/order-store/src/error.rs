use thiserror::Error;

use crate::{OrderId, Version};

/// Errors that can occur when interacting with the order or idempotency stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version did not match the version the writer loaded.
    /// Another writer touched the order in between.
    #[error(
        "Concurrency conflict for order {order_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// The order was not found in the store.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// An order with this ID was already inserted.
    #[error("Order already exists: {0}")]
    AlreadyExists(OrderId),

    /// An idempotency key was completed by someone other than its claimer,
    /// or completed without being claimed.
    #[error("Idempotency key not claimed: {0}")]
    UnclaimedKey(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
