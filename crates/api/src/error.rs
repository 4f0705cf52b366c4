//! API error types with HTTP response mapping.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{
    CompensationReport, CompensationStatus, SagaFailure, SagaStep, UpstreamError,
    UpstreamErrorKind, ValidationError,
};
use order_store::StoreError;
use saga::SagaError;
use serde::Serialize;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// The request body was not a JSON order.
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),

    /// The request body failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Saga execution error.
    #[error(transparent)]
    Saga(#[from] SagaError),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

/// JSON body of every error response.
///
/// Upstream bodies are never forwarded; only the structured summary in
/// `upstream` is.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<SagaStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationReport>,
}

impl ErrorBody {
    fn new(kind: &'static str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind,
            order_id: None,
            failed_step: None,
            upstream: None,
            compensation: None,
        }
    }

    fn for_failure(failure: SagaFailure) -> Self {
        let kind = if failure.compensation.status == CompensationStatus::Failed {
            "compensation_failed"
        } else if failure.upstream.kind == UpstreamErrorKind::Rejected {
            "upstream_rejected"
        } else {
            "upstream_unavailable"
        };
        Self {
            error: failure_message(&failure),
            kind,
            order_id: Some(failure.order_id.to_string()),
            failed_step: Some(failure.failed_step),
            upstream: Some(failure.upstream),
            compensation: Some(failure.compensation),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::new("not_found", msg)),
            ApiError::InvalidBody(rejection) => (
                rejection.status(),
                ErrorBody::new("validation_error", rejection.body_text()),
            ),
            ApiError::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody::new("validation_error", err.to_string()),
            ),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal_error", msg),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, ErrorBody) {
    match err {
        SagaError::StepFailed(failure) => {
            let status = failure_status(&failure);
            if status.is_server_error() {
                tracing::error!(
                    order_id = %failure.order_id,
                    step = %failure.failed_step,
                    unresolved = ?failure.compensation.unresolved_steps,
                    "compensation failed, order needs manual reconciliation"
                );
            }
            (status, ErrorBody::for_failure(*failure))
        }
        SagaError::IdempotencyInProgress { .. } => (
            StatusCode::CONFLICT,
            ErrorBody::new("idempotency_in_progress", err.to_string()),
        ),
        SagaError::OrderNotFound(order_id) => {
            let mut body = ErrorBody::new("not_found", "Order not found");
            body.order_id = Some(order_id.to_string());
            (StatusCode::NOT_FOUND, body)
        }
        SagaError::Store(StoreError::NotFound(order_id)) => {
            let mut body = ErrorBody::new("not_found", "Order not found");
            body.order_id = Some(order_id.to_string());
            (StatusCode::NOT_FOUND, body)
        }
        SagaError::Order(_) | SagaError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::new("internal_error", err.to_string()),
            )
        }
    }
}

/// HTTP status for a failed saga: per failed step, or 500 when the order
/// was left with steps committed downstream.
fn failure_status(failure: &SagaFailure) -> StatusCode {
    if failure.compensation.status == CompensationStatus::Failed {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    match failure.failed_step {
        SagaStep::ReserveInventory | SagaStep::CreateShipment => StatusCode::CONFLICT,
        SagaStep::AuthorizePayment => StatusCode::PAYMENT_REQUIRED,
    }
}

fn failure_message(failure: &SagaFailure) -> String {
    let action = match failure.failed_step {
        SagaStep::ReserveInventory => "Inventory reservation",
        SagaStep::AuthorizePayment => "Payment authorization",
        SagaStep::CreateShipment => "Shipping creation",
    };
    if failure.compensation.status == CompensationStatus::Failed {
        format!(
            "{action} failed and compensation did not complete: {}",
            failure.upstream.detail
        )
    } else {
        format!("{action} failed: {}", failure.upstream.detail)
    }
}
