//! Shipping service trait and in-memory implementation.
//!
//! Shipments have no inverse; once created they are final.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::OrderId;
use domain::{Address, LineItem, UpstreamError};
use serde::Serialize;

use super::{CallLog, Faults, delay, lock};

const SERVICE: &str = "shipping";

/// Everything the shipping service needs to create a shipment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRequest {
    pub order_id: OrderId,
    pub address: Address,
    pub reservation_id: String,
    pub items: Vec<LineItem>,
}

/// Result of a successful shipment creation.
#[derive(Debug, Clone)]
pub struct ShipmentResult {
    /// The shipment ID assigned by the shipping service.
    pub shipment_id: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Creates a shipment against an inventory reservation.
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentResult, UpstreamError>;
}

#[async_trait]
impl<T: ShippingService + ?Sized> ShippingService for Arc<T> {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentResult, UpstreamError> {
        (**self).create_shipment(request).await
    }
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<String, ShipmentRequest>,
    next_id: u32,
    create_calls: usize,
    create_faults: Faults,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<Mutex<InMemoryShippingState>>,
    log: CallLog,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
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

    /// Configures every create call to be rejected.
    pub fn set_fail_on_create(&self, fail: bool) {
        lock(&self.state).create_faults.reject = fail;
    }

    /// Configures every create call to fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).create_faults.unavailable = unavailable;
    }

    /// Delays every create call.
    pub fn set_create_delay(&self, delay: Option<std::time::Duration>) {
        lock(&self.state).create_faults.delay = delay;
    }

    /// Returns the number of shipments created.
    pub fn shipment_count(&self) -> usize {
        lock(&self.state).shipments.len()
    }

    /// Returns the request a shipment was created from.
    pub fn shipment(&self, shipment_id: &str) -> Option<ShipmentRequest> {
        lock(&self.state).shipments.get(shipment_id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentResult, UpstreamError> {
        let wait = {
            let mut state = lock(&self.state);
            state.create_calls += 1;
            state.create_faults.delay
        };
        self.log
            .record(format!("{SERVICE}.create_shipment:{}", request.order_id));
        delay(wait).await;

        let mut state = lock(&self.state);
        state.create_faults.check(SERVICE, "create_shipment")?;

        state.next_id += 1;
        let shipment_id = format!("SHP-{:04}", state.next_id);
        state.shipments.insert(shipment_id.clone(), request.clone());

        Ok(ShipmentResult { shipment_id })
    }
}
