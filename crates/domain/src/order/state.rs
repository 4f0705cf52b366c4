//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The lifecycle status of an order.
///
/// State transitions:
/// ```text
/// Pending ──► Reserved ──► Paid ──► Shipped ──► Completed
///    │            │          │
///    │            └──────────┴──► Compensating ──┬──► Compensated
///    │                                           └──► Failed
///    └──────────────────────────────────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order persisted, no downstream step committed yet.
    #[default]
    Pending,

    /// Inventory has been reserved, awaiting payment.
    Reserved,

    /// Payment authorized, awaiting shipment.
    Paid,

    /// Shipment created.
    Shipped,

    /// All steps committed (terminal state).
    Completed,

    /// Saga failed and could not be rolled back cleanly, or failed before
    /// anything was committed (terminal state).
    Failed,

    /// A step failed and committed steps are being undone.
    Compensating,

    /// Every committed step was undone (terminal state).
    Compensated,
}

impl OrderStatus {
    /// Returns true if inventory can be reserved in this status.
    pub fn can_reserve(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if payment can be recorded in this status.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Reserved)
    }

    /// Returns true if a shipment can be recorded in this status.
    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Paid)
    }

    /// Returns true if the order can be completed in this status.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Shipped)
    }

    /// Returns true if compensation can begin (or resume) in this status.
    pub fn can_compensate(&self) -> bool {
        matches!(
            self,
            OrderStatus::Reserved | OrderStatus::Paid | OrderStatus::Compensating
        )
    }

    /// Returns true if the order can be marked failed in this status.
    pub fn can_fail(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Compensating)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Compensated
        )
    }

    /// Returns the status name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Reserved => "reserved",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Compensating => "compensating",
            OrderStatus::Compensated => "compensated",
        }
    }

    /// Parses a wire status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "reserved" => Some(OrderStatus::Reserved),
            "paid" => Some(OrderStatus::Paid),
            "shipped" => Some(OrderStatus::Shipped),
            "completed" => Some(OrderStatus::Completed),
            "failed" => Some(OrderStatus::Failed),
            "compensating" => Some(OrderStatus::Compensating),
            "compensated" => Some(OrderStatus::Compensated),
            _ => None,
        }
    }

    /// Every non-terminal status, in lifecycle order.
    pub fn in_flight() -> [OrderStatus; 5] {
        [
            OrderStatus::Pending,
            OrderStatus::Reserved,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Compensating,
        ]
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_happy_path_guards() {
        assert!(OrderStatus::Pending.can_reserve());
        assert!(!OrderStatus::Reserved.can_reserve());

        assert!(OrderStatus::Reserved.can_pay());
        assert!(!OrderStatus::Pending.can_pay());
        assert!(!OrderStatus::Paid.can_pay());

        assert!(OrderStatus::Paid.can_ship());
        assert!(!OrderStatus::Reserved.can_ship());

        assert!(OrderStatus::Shipped.can_complete());
        assert!(!OrderStatus::Paid.can_complete());
    }

    #[test]
    fn test_can_compensate_only_after_reservation() {
        assert!(!OrderStatus::Pending.can_compensate());
        assert!(OrderStatus::Reserved.can_compensate());
        assert!(OrderStatus::Paid.can_compensate());
        assert!(OrderStatus::Compensating.can_compensate());
        assert!(!OrderStatus::Shipped.can_compensate());
        assert!(!OrderStatus::Completed.can_compensate());
        assert!(!OrderStatus::Compensated.can_compensate());
        assert!(!OrderStatus::Failed.can_compensate());
    }

    #[test]
    fn test_can_fail() {
        assert!(OrderStatus::Pending.can_fail());
        assert!(OrderStatus::Compensating.can_fail());
        assert!(!OrderStatus::Reserved.can_fail());
        assert!(!OrderStatus::Completed.can_fail());
        assert!(!OrderStatus::Compensated.can_fail());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Reserved.is_terminal());
        assert!(!OrderStatus::Paid.is_terminal());
        assert!(!OrderStatus::Shipped.is_terminal());
        assert!(!OrderStatus::Compensating.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Compensated.is_terminal());
    }

    #[test]
    fn test_in_flight_statuses_are_not_terminal() {
        for status in OrderStatus::in_flight() {
            assert!(!status.is_terminal(), "{status} should be in flight");
        }
    }

    #[test]
    fn test_display_and_parse_agree() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Reserved,
            OrderStatus::Paid,
            OrderStatus::Shipped,
            OrderStatus::Completed,
            OrderStatus::Failed,
            OrderStatus::Compensating,
            OrderStatus::Compensated,
        ] {
            assert_eq!(OrderStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(OrderStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Compensating).unwrap();
        assert_eq!(json, "\"compensating\"");
        let status: OrderStatus = serde_json::from_str("\"paid\"").unwrap();
        assert_eq!(status, OrderStatus::Paid);
    }
}
