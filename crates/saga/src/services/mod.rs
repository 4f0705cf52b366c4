//! Downstream service traits, in-memory fakes and HTTP clients.
//!
//! The traits are single-attempt; retry and timeout are applied by the
//! caller through [`CallPolicy`](crate::policy::CallPolicy).

pub mod http;
pub mod inventory;
pub mod payment;
pub mod shipping;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use domain::UpstreamError;

pub use http::{HttpInventoryService, HttpPaymentService, HttpShippingService};
pub use inventory::{InMemoryInventoryService, InventoryService, ReservationResult};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
pub use shipping::{InMemoryShippingService, ShipmentRequest, ShipmentResult, ShippingService};

/// Ordered record of downstream calls, shared across in-memory services.
///
/// Entries look like `payment.refund:PAY-0001`.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Entries that start with `prefix`, e.g. `inventory.release`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Scripted failures for one operation of an in-memory service.
#[derive(Debug, Clone, Default)]
pub(crate) struct Faults {
    /// Every call is rejected with a business error.
    pub reject: bool,
    /// Every call fails as unavailable.
    pub unavailable: bool,
    /// The next N calls fail as unavailable.
    pub transient: u32,
    /// Delay applied before the call completes.
    pub delay: Option<Duration>,
}

impl Faults {
    /// Consumes one scripted failure, if any applies to this call.
    pub fn check(&mut self, service: &str, operation: &str) -> Result<(), UpstreamError> {
        if self.reject {
            return Err(UpstreamError::rejected(
                service,
                Some(409),
                format!("{operation} rejected"),
            ));
        }
        if self.unavailable {
            return Err(UpstreamError::unavailable(
                service,
                Some(503),
                format!("{operation} unavailable"),
            ));
        }
        if self.transient > 0 {
            self.transient -= 1;
            return Err(UpstreamError::unavailable(
                service,
                Some(503),
                format!("{operation} temporarily unavailable"),
            ));
        }
        Ok(())
    }
}

/// Locks a mutex, recovering the data if another holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits out an injected delay, if any.
pub(crate) async fn delay(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}
