//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::OrderId;
use domain::{LineItem, UpstreamError};

use super::{CallLog, Faults, delay, lock};

const SERVICE: &str = "inventory";

/// Result of a successful inventory reservation.
#[derive(Debug, Clone)]
pub struct ReservationResult {
    /// The reservation ID assigned by the inventory service.
    pub reservation_id: String,
}

/// Trait for inventory management operations.
///
/// A reservation covers every item of the order or none of them.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for all items of an order.
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
    ) -> Result<ReservationResult, UpstreamError>;

    /// Releases a previously made reservation.
    async fn release(&self, reservation_id: &str) -> Result<(), UpstreamError>;
}

#[async_trait]
impl<T: InventoryService + ?Sized> InventoryService for Arc<T> {
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
    ) -> Result<ReservationResult, UpstreamError> {
        (**self).reserve(order_id, items).await
    }

    async fn release(&self, reservation_id: &str) -> Result<(), UpstreamError> {
        (**self).release(reservation_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, (OrderId, Vec<LineItem>)>,
    next_id: u32,
    reserve_calls: usize,
    release_calls: usize,
    reserve_faults: Faults,
    release_faults: Faults,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<Mutex<InMemoryInventoryState>>,
    log: CallLog,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service that records its calls into a shared log.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Configures every reserve call to be rejected (out of stock).
    pub fn set_fail_on_reserve(&self, fail: bool) {
        lock(&self.state).reserve_faults.reject = fail;
    }

    /// Fails the next `n` reserve calls with a transient error.
    pub fn fail_next_reserves(&self, n: u32) {
        lock(&self.state).reserve_faults.transient = n;
    }

    /// Delays every reserve call.
    pub fn set_reserve_delay(&self, delay: Option<std::time::Duration>) {
        lock(&self.state).reserve_faults.delay = delay;
    }

    /// Configures every release call to fail as unavailable.
    pub fn set_fail_on_release(&self, fail: bool) {
        lock(&self.state).release_faults.unavailable = fail;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        lock(&self.state).reservations.len()
    }

    /// Returns true if a reservation exists with the given ID.
    pub fn has_reservation(&self, reservation_id: &str) -> bool {
        lock(&self.state).reservations.contains_key(reservation_id)
    }

    pub fn reserve_calls(&self) -> usize {
        lock(&self.state).reserve_calls
    }

    pub fn release_calls(&self) -> usize {
        lock(&self.state).release_calls
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
    ) -> Result<ReservationResult, UpstreamError> {
        let wait = {
            let mut state = lock(&self.state);
            state.reserve_calls += 1;
            state.reserve_faults.delay
        };
        self.log.record(format!("{SERVICE}.reserve:{order_id}"));
        delay(wait).await;

        let mut state = lock(&self.state);
        state.reserve_faults.check(SERVICE, "reserve")?;

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state
            .reservations
            .insert(reservation_id.clone(), (order_id, items.to_vec()));

        Ok(ReservationResult { reservation_id })
    }

    async fn release(&self, reservation_id: &str) -> Result<(), UpstreamError> {
        let mut state = lock(&self.state);
        state.release_calls += 1;
        self.log.record(format!("{SERVICE}.release:{reservation_id}"));
        state.release_faults.check(SERVICE, "release")?;
        state.reservations.remove(reservation_id);
        Ok(())
    }
}
