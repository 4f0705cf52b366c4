//! Order record and related types.

mod aggregate;
mod outcome;
mod state;
mod step;
mod value_objects;

pub use aggregate::Order;
pub use outcome::{
    CompensationReport, CompensationStatus, OrderFailure, OrderOutcome, SagaFailure,
    UpstreamError, UpstreamErrorKind,
};
pub use state::OrderStatus;
pub use step::{CommittedStep, SagaStep};
pub use value_objects::{Address, Currency, DEFAULT_CURRENCY, LineItem, Money, Sku};

use thiserror::Error;

/// Errors raised by order transitions.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the transition.
    #[error("Invalid state transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// Order cannot be marked compensated while committed steps remain.
    #[error("Committed steps not yet compensated: {steps:?}")]
    UncompensatedSteps { steps: Vec<SagaStep> },
}
