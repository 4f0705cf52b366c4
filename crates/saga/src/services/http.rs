//! HTTP clients for the downstream inventory, payment and shipping services.
//!
//! Each client makes exactly one request per attempt. Failures are mapped to
//! [`UpstreamError`]: timeouts, connection errors, 5xx and 429 are transient;
//! every other non-2xx status is a rejection. Only the `detail` field of an
//! error body is surfaced, never the raw body.

use async_trait::async_trait;
use common::OrderId;
use domain::{Currency, LineItem, Money, UpstreamError};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;

use super::inventory::{InventoryService, ReservationResult};
use super::payment::{PaymentResult, PaymentService};
use super::shipping::{ShipmentRequest, ShipmentResult, ShippingService};

/// Connection to one downstream service.
#[derive(Debug, Clone)]
struct Downstream {
    service: &'static str,
    client: Client,
    base_url: String,
}

impl Downstream {
    fn new(service: &'static str, client: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            service,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(format!("{}{}", self.base_url, path))
    }

    /// Sends a request and returns the decoded JSON body (`Null` if empty).
    async fn send(&self, request: RequestBuilder) -> Result<Value, UpstreamError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(self.service, &e))?;
        let status = response.status();

        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(self.service, &e))?;
            if body.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&body).map_err(|_| {
                UpstreamError::rejected(
                    self.service,
                    Some(status.as_u16()),
                    "malformed response body",
                )
            });
        }

        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        tracing::debug!(service = self.service, %status, %detail, "Downstream returned error status");
        Err(status_error(self.service, status, detail))
    }

    /// Reads the `id` of a created resource.
    fn created_id(&self, body: &Value) -> Result<String, UpstreamError> {
        match body.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(UpstreamError::rejected(
                self.service,
                None,
                "response is missing an id",
            )),
        }
    }
}

/// Extracts the `detail` field of a JSON error body.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(detail) => Some(detail.clone()),
        other => Some(other.to_string()),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn status_error(service: &'static str, status: StatusCode, detail: String) -> UpstreamError {
    if is_retryable_status(status) {
        UpstreamError::unavailable(service, Some(status.as_u16()), detail)
    } else {
        UpstreamError::rejected(service, Some(status.as_u16()), detail)
    }
}

fn transport_error(service: &'static str, err: &reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout(service, "request timed out")
    } else if err.is_connect() {
        UpstreamError::unavailable(service, None, "connection failed")
    } else {
        UpstreamError::unavailable(service, None, "request failed")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReserveBody<'a> {
    order_id: OrderId,
    items: &'a [LineItem],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IntentBody<'a> {
    order_id: OrderId,
    amount: Money,
    currency: &'a Currency,
}

/// Inventory service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpInventoryService {
    downstream: Downstream,
}

impl HttpInventoryService {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            downstream: Downstream::new("inventory", client, base_url),
        }
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
    ) -> Result<ReservationResult, UpstreamError> {
        let body = ReserveBody { order_id, items };
        let response = self
            .downstream
            .send(self.downstream.post("/reserve").json(&body))
            .await?;

        Ok(ReservationResult {
            reservation_id: self.downstream.created_id(&response)?,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, reservation_id: &str) -> Result<(), UpstreamError> {
        let path = format!("/reservations/{reservation_id}/release");
        self.downstream.send(self.downstream.post(&path)).await?;
        Ok(())
    }
}

/// Payment service over HTTP.
///
/// Authorization creates a payment intent under an idempotency key derived
/// from the order, then confirms it; the intent id is the transaction id.
/// A retried authorization therefore reuses the same intent.
#[derive(Debug, Clone)]
pub struct HttpPaymentService {
    downstream: Downstream,
}

impl HttpPaymentService {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            downstream: Downstream::new("payment", client, base_url),
        }
    }

    /// Idempotency key sent with the intent for `order_id`.
    pub fn intent_key(order_id: OrderId) -> String {
        format!("order:{order_id}:intent")
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    #[tracing::instrument(skip(self, amount), fields(amount = %amount))]
    async fn authorize(
        &self,
        order_id: OrderId,
        amount: Money,
        currency: &Currency,
    ) -> Result<PaymentResult, UpstreamError> {
        let body = IntentBody {
            order_id,
            amount,
            currency,
        };
        let intent = self
            .downstream
            .send(
                self.downstream
                    .post("/intents")
                    .header("Idempotency-Key", Self::intent_key(order_id))
                    .json(&body),
            )
            .await?;
        let transaction_id = self.downstream.created_id(&intent)?;

        // A failed confirmation leaves no transaction id on the order, so
        // nothing is refunded. Retries reach the same intent via its key.
        let path = format!("/intents/{transaction_id}/confirm");
        if let Err(err) = self.downstream.send(self.downstream.post(&path)).await {
            tracing::warn!(
                %order_id,
                intent_id = %transaction_id,
                kind = ?err.kind,
                "Payment intent confirmation failed"
            );
            return Err(err);
        }

        Ok(PaymentResult { transaction_id })
    }

    #[tracing::instrument(skip(self))]
    async fn refund(&self, transaction_id: &str) -> Result<(), UpstreamError> {
        let path = format!("/charges/{transaction_id}/refund");
        self.downstream.send(self.downstream.post(&path)).await?;
        Ok(())
    }
}

/// Shipping service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpShippingService {
    downstream: Downstream,
}

impl HttpShippingService {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            downstream: Downstream::new("shipping", client, base_url),
        }
    }
}

#[async_trait]
impl ShippingService for HttpShippingService {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentResult, UpstreamError> {
        let response = self
            .downstream
            .send(self.downstream.post("/shipments").json(request))
            .await?;

        Ok(ShipmentResult {
            shipment_id: self.downstream.created_id(&response)?,
        })
    }
}
