//! Domain layer for the order orchestration service.
//!
//! This crate provides:
//! - The `Order` record with its status state machine
//! - Value objects (money, currency, address, line items)
//! - Request validation producing a `NewOrder`
//! - Saga step identifiers and the recorded outcomes of a saga run

pub mod order;
pub mod validation;

pub use order::{
    Address, CommittedStep, CompensationReport, CompensationStatus, Currency, DEFAULT_CURRENCY,
    LineItem, Money, Order, OrderError, OrderFailure, OrderOutcome, OrderStatus, SagaFailure,
    SagaStep, Sku, UpstreamError, UpstreamErrorKind,
};
pub use validation::{CreateOrderRequest, NewOrder, OrderItemRequest, ValidationError};
