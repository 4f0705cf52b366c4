//! Recorded saga outcomes.
//!
//! These are the values persisted on a failed order and in idempotency
//! records, so a replayed request returns exactly what the first one did.

use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{Order, OrderStatus, SagaStep};

/// Classification of a downstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    /// Explicit business denial (insufficient stock, declined payment, 4xx).
    Rejected,
    /// Transient failure (5xx, connection error) that outlived its retry budget.
    Unavailable,
    /// The call did not answer within its timeout on any attempt.
    Timeout,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Rejected => "rejected",
            UpstreamErrorKind::Unavailable => "unavailable",
            UpstreamErrorKind::Timeout => "timeout",
        }
    }
}

/// Structured summary of a downstream error. Never carries raw bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamError {
    /// Downstream service name (`inventory`, `payment`, `shipping`).
    pub service: String,
    pub kind: UpstreamErrorKind,
    /// HTTP status returned by the service, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub detail: String,
}

impl UpstreamError {
    /// Maximum length of `detail`, in characters.
    pub const MAX_DETAIL_LEN: usize = 200;

    pub fn new(
        service: impl Into<String>,
        kind: UpstreamErrorKind,
        status: Option<u16>,
        detail: impl Into<String>,
    ) -> Self {
        let detail: String = detail.into();
        Self {
            service: service.into(),
            kind,
            status,
            detail: detail.chars().take(Self::MAX_DETAIL_LEN).collect(),
        }
    }

    pub fn rejected(
        service: impl Into<String>,
        status: Option<u16>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(service, UpstreamErrorKind::Rejected, status, detail)
    }

    pub fn unavailable(
        service: impl Into<String>,
        status: Option<u16>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(service, UpstreamErrorKind::Unavailable, status, detail)
    }

    pub fn timeout(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(service, UpstreamErrorKind::Timeout, None, detail)
    }

    /// Returns true if another attempt may succeed (timeouts, 5xx, 429).
    pub fn is_transient(&self) -> bool {
        !matches!(self.kind, UpstreamErrorKind::Rejected)
    }
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.service, self.kind.as_str(), self.detail)
    }
}

impl std::error::Error for UpstreamError {}

/// Failure recorded on an order whose saga did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFailure {
    pub failed_step: SagaStep,
    pub upstream: UpstreamError,
}

/// Whether the committed steps of a failed saga were rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStatus {
    /// Nothing had committed, nothing to undo.
    NotRequired,
    /// Every committed step was undone.
    Completed,
    /// At least one inverse call failed after its retry budget.
    Failed,
}

/// Result of running compensation for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationReport {
    pub status: CompensationStatus,
    /// Steps left committed downstream that need manual reconciliation.
    #[serde(default)]
    pub unresolved_steps: Vec<SagaStep>,
}

impl CompensationReport {
    pub fn not_required() -> Self {
        Self {
            status: CompensationStatus::NotRequired,
            unresolved_steps: Vec::new(),
        }
    }

    pub fn completed() -> Self {
        Self {
            status: CompensationStatus::Completed,
            unresolved_steps: Vec::new(),
        }
    }

    pub fn failed(unresolved_steps: Vec<SagaStep>) -> Self {
        Self {
            status: CompensationStatus::Failed,
            unresolved_steps,
        }
    }

    /// Returns true when the order ended consistent (nothing left committed).
    pub fn is_clean(&self) -> bool {
        self.status != CompensationStatus::Failed
    }
}

/// Descriptor of a saga that failed at one of its steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaFailure {
    pub order_id: OrderId,
    pub failed_step: SagaStep,
    pub upstream: UpstreamError,
    pub compensation: CompensationReport,
    /// Terminal status the order ended in (`failed` or `compensated`).
    pub order_status: OrderStatus,
}

/// Final outcome of an order creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum OrderOutcome {
    Completed(Order),
    Failed(SagaFailure),
}

impl OrderOutcome {
    /// Returns the order identifier the outcome refers to.
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderOutcome::Completed(order) => order.id(),
            OrderOutcome::Failed(failure) => failure.order_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OrderOutcome::Completed(_))
    }
}
