//! Order fulfillment saga steps.

use serde::{Deserialize, Serialize};

/// A forward step of the order fulfillment saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    /// Reserve inventory for every line item.
    ReserveInventory,
    /// Authorize payment for the order total.
    AuthorizePayment,
    /// Create the shipment.
    CreateShipment,
}

impl SagaStep {
    /// All steps in execution order.
    pub const ALL: [SagaStep; 3] = [
        SagaStep::ReserveInventory,
        SagaStep::AuthorizePayment,
        SagaStep::CreateShipment,
    ];

    /// Returns the step name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ReserveInventory => "reserve_inventory",
            SagaStep::AuthorizePayment => "authorize_payment",
            SagaStep::CreateShipment => "create_shipment",
        }
    }

    /// Returns true if the step has a compensating action.
    ///
    /// Shipment creation is always last, so a failure never leaves one to undo.
    pub fn has_inverse(&self) -> bool {
        !matches!(self, SagaStep::CreateShipment)
    }

    /// Returns the downstream service this step talks to.
    pub fn service(&self) -> &'static str {
        match self {
            SagaStep::ReserveInventory => "inventory",
            SagaStep::AuthorizePayment => "payment",
            SagaStep::CreateShipment => "shipping",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A step that committed downstream, with the identifier it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedStep {
    pub step: SagaStep,
    pub external_id: String,
}

impl CommittedStep {
    pub fn new(step: SagaStep, external_id: impl Into<String>) -> Self {
        Self {
            step,
            external_id: external_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names() {
        let names: Vec<_> = SagaStep::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            ["reserve_inventory", "authorize_payment", "create_shipment"]
        );
    }

    #[test]
    fn test_only_shipment_lacks_inverse() {
        assert!(SagaStep::ReserveInventory.has_inverse());
        assert!(SagaStep::AuthorizePayment.has_inverse());
        assert!(!SagaStep::CreateShipment.has_inverse());
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&SagaStep::AuthorizePayment).unwrap();
        assert_eq!(json, "\"authorize_payment\"");
    }
}
