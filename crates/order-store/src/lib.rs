//! Persistence for orders and idempotency records.
//!
//! The saga only talks to the [`OrderStore`] and [`IdempotencyStore`]
//! traits. In-memory implementations back tests and single-process runs;
//! the PostgreSQL implementations back deployments with a `DATABASE_URL`.

pub mod error;
pub mod idempotency;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{OrderId, Version};
pub use error::{Result, StoreError};
pub use idempotency::{Claim, IdempotencyRecord, IdempotencyStore};
pub use memory::{InMemoryIdempotencyStore, InMemoryOrderStore};
pub use postgres::{PostgresIdempotencyStore, PostgresOrderStore};
pub use store::{OrderStore, OrderStoreExt};
