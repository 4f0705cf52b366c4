//! Saga error types.

use common::OrderId;
use domain::{OrderError, SagaFailure};
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A step failed. Compensation has already run; the descriptor says how
    /// it went.
    #[error("Saga failed at {}: {}", .0.failed_step, .0.upstream)]
    StepFailed(Box<SagaFailure>),

    /// Another request holding the same idempotency key is still running.
    #[error("Request with idempotency key '{key}' is already in progress for order {order_id}")]
    IdempotencyInProgress { key: String, order_id: OrderId },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order rejected a lifecycle transition.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Order or idempotency store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SagaError {
    /// Returns the failure descriptor if a saga step failed.
    pub fn failure(&self) -> Option<&SagaFailure> {
        match self {
            SagaError::StepFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
