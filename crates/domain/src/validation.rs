//! Order request decoding and validation.
//!
//! A [`CreateOrderRequest`] is the wire shape of `POST /orders`. Only a
//! [`NewOrder`] produced by [`CreateOrderRequest::validate`] can be handed
//! to the saga orchestrator, so invalid input never reaches it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{Address, Currency, DEFAULT_CURRENCY, LineItem, Money, Sku};

/// Errors found while validating an order request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Order must contain at least one item")]
    NoItems,

    #[error("Item {index} has an empty sku")]
    EmptySku { index: usize },

    #[error("Invalid quantity {qty} for sku {sku} (must be at least 1)")]
    InvalidQuantity { sku: String, qty: i64 },

    #[error("Invalid price {price} for sku {sku} (must be a finite value >= 0)")]
    InvalidPrice { sku: String, price: f64 },

    #[error("Address field {field} must not be empty")]
    MissingAddressField { field: &'static str },

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Order total exceeds the largest representable amount")]
    TotalTooLarge,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// Body of an order creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub address: Address,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub items: Vec<OrderItemRequest>,
}

/// A requested line item, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub sku: String,
    pub qty: i64,
    pub price: f64,
}

/// A validated order, ready for the saga.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: Option<String>,
    pub address: Address,
    pub currency: Currency,
    pub items: Vec<LineItem>,
}

impl CreateOrderRequest {
    /// Validates the request, returning the first problem found.
    pub fn validate(self) -> Result<NewOrder, ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }

        let address = validate_address(self.address)?;
        let currency = Currency::parse(&self.currency)
            .ok_or_else(|| ValidationError::InvalidCurrency(self.currency.clone()))?;

        let items = self
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| validate_item(index, item))
            .collect::<Result<Vec<_>, _>>()?;
        checked_total(&items).ok_or(ValidationError::TotalTooLarge)?;

        let user_id = self.user_id.filter(|id| !id.trim().is_empty());

        Ok(NewOrder {
            user_id,
            address,
            currency,
            items,
        })
    }
}

fn validate_item(index: usize, item: OrderItemRequest) -> Result<LineItem, ValidationError> {
    let sku = item.sku.trim();
    if sku.is_empty() {
        return Err(ValidationError::EmptySku { index });
    }

    let qty = u32::try_from(item.qty)
        .ok()
        .filter(|q| *q >= 1)
        .ok_or_else(|| ValidationError::InvalidQuantity {
            sku: sku.to_string(),
            qty: item.qty,
        })?;

    let price = Money::try_from_major(item.price)
        .filter(|_| item.price >= 0.0)
        .ok_or_else(|| ValidationError::InvalidPrice {
            sku: sku.to_string(),
            price: item.price,
        })?;

    Ok(LineItem::new(Sku::new(sku), qty, price))
}

/// Sum of qty * price over all items, or None if it overflows.
fn checked_total(items: &[LineItem]) -> Option<Money> {
    items.iter().try_fold(Money::zero(), |total, item| {
        item.price
            .checked_mul(item.qty)
            .and_then(|line| total.checked_add(line))
    })
}

fn validate_address(address: Address) -> Result<Address, ValidationError> {
    let fields = [
        ("line1", &address.line1),
        ("city", &address.city),
        ("country", &address.country),
        ("postalCode", &address.postal_code),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingAddressField { field });
        }
    }
    Ok(address)
}
