//! Saga orchestration for order fulfillment.
//!
//! The order fulfillment saga follows these steps:
//! 1. Reserve inventory
//! 2. Authorize payment
//! 3. Create shipment
//!
//! The order is checkpointed after every step. If a step fails, the
//! previously committed steps are compensated in reverse order. An
//! idempotency guard in front of the saga makes retried requests replay
//! the first outcome instead of running the saga again.

pub mod compensation;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod policy;
pub mod services;

pub use compensation::CompensationEngine;
pub use context::SagaContext;
pub use coordinator::SagaCoordinator;
pub use error::{Result, SagaError};
pub use guard::IdempotencyGuard;
pub use policy::CallPolicy;
pub use services::{
    CallLog, HttpInventoryService, HttpPaymentService, HttpShippingService,
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService, InventoryService,
    PaymentResult, PaymentService, ReservationResult, ShipmentRequest, ShipmentResult,
    ShippingService,
};
