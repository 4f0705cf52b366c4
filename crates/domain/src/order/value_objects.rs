//! Value objects for the order domain.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The currency used when a request does not name one.
pub const DEFAULT_CURRENCY: &str = "INR";

/// Stock keeping unit identifying a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    /// Creates a new SKU from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the SKU as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sku {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Sku {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Sku {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// ISO-4217 style currency code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parses a three-letter alphabetic currency code, normalizing to upper case.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Self(code.to_ascii_uppercase()))
        } else {
            None
        }
    }

    /// Returns the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self(DEFAULT_CURRENCY.to_string())
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount held in minor units (paise, cents) to avoid floating point drift.
///
/// On the wire it is a decimal number in major units (`10.5`), matching the
/// request and downstream payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    minor: i64,
}

impl Money {
    /// Creates a new amount from minor units.
    pub fn from_minor(minor: i64) -> Self {
        Self { minor }
    }

    /// Creates a new amount from a decimal major-unit value, rounded to two places.
    ///
    /// Values outside the `i64` minor-unit range saturate; use
    /// [`Money::try_from_major`] for untrusted input.
    pub fn from_major(major: f64) -> Self {
        Self {
            minor: (major * 100.0).round() as i64,
        }
    }

    /// Like [`Money::from_major`], but returns None for non-finite values and
    /// values that do not fit in minor units.
    pub fn try_from_major(major: f64) -> Option<Self> {
        let minor = (major * 100.0).round();
        // `i64::MAX as f64` rounds up to 2^63, which is out of range.
        (minor.is_finite() && minor >= i64::MIN as f64 && minor < i64::MAX as f64)
            .then_some(Self {
                minor: minor as i64,
            })
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { minor: 0 }
    }

    /// Returns the amount in minor units.
    pub fn minor(&self) -> i64 {
        self.minor
    }

    /// Returns the amount as a decimal major-unit value.
    pub fn as_major(&self) -> f64 {
        self.minor as f64 / 100.0
    }

    /// Multiplies by a quantity, saturating at the bounds of the minor-unit range.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            minor: self.minor.saturating_mul(i64::from(quantity)),
        }
    }

    /// Multiplies by a quantity, returning None on overflow.
    pub fn checked_mul(&self, quantity: u32) -> Option<Money> {
        self.minor
            .checked_mul(i64::from(quantity))
            .map(Money::from_minor)
    }

    /// Adds two amounts, returning None on overflow.
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.minor.checked_add(rhs.minor).map(Money::from_minor)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.minor < 0 { "-" } else { "" };
        let abs = self.minor.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            minor: self.minor.saturating_add(rhs.minor),
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.minor = self.minor.saturating_add(rhs.minor);
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let major = f64::deserialize(deserializer)?;
        Ok(Money::from_major(major))
    }
}

/// Shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub line1: String,
    pub city: String,
    pub country: String,
    pub postal_code: String,
}

impl Address {
    /// Creates a new address.
    pub fn new(
        line1: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
        postal_code: impl Into<String>,
    ) -> Self {
        Self {
            line1: line1.into(),
            city: city.into(),
            country: country.into(),
            postal_code: postal_code.into(),
        }
    }
}

/// A line item in an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The product being ordered.
    pub sku: Sku,

    /// Quantity ordered (at least 1).
    pub qty: u32,

    /// Price per unit.
    pub price: Money,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(sku: impl Into<Sku>, qty: u32, price: Money) -> Self {
        Self {
            sku: sku.into(),
            qty,
            price,
        }
    }

    /// Returns the total price for this item (qty * price).
    pub fn total_price(&self) -> Money {
        self.price.multiply(self.qty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_from_major_rounds_to_minor_units() {
        assert_eq!(Money::from_major(10.0).minor(), 1000);
        assert_eq!(Money::from_major(0.1 + 0.2).minor(), 30);
        assert_eq!(Money::from_major(19.999).minor(), 2000);
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_minor(1234).to_string(), "12.34");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1234).to_string(), "-12.34");
    }

    #[test]
    fn test_money_sum() {
        let total: Money = [Money::from_minor(100), Money::from_minor(250)]
            .into_iter()
            .sum();
        assert_eq!(total.minor(), 350);
    }

    #[test]
    fn test_money_checked_arithmetic() {
        let big = Money::from_minor(i64::MAX / 2 + 1);
        assert_eq!(big.checked_mul(2), None);
        assert_eq!(big.checked_add(big), None);
        assert_eq!(
            Money::from_minor(250).checked_mul(4),
            Some(Money::from_minor(1000))
        );
        assert_eq!(big.multiply(2).minor(), i64::MAX);
        assert_eq!((big + big).minor(), i64::MAX);
    }

    #[test]
    fn test_money_try_from_major_rejects_out_of_range() {
        assert_eq!(Money::try_from_major(10.5), Some(Money::from_minor(1050)));
        assert_eq!(Money::try_from_major(1e17), None);
        assert_eq!(Money::try_from_major(f64::NAN), None);
        assert_eq!(Money::try_from_major(f64::INFINITY), None);
    }

    #[test]
    fn test_money_serializes_as_major_units() {
        let json = serde_json::to_string(&Money::from_minor(2050)).unwrap();
        assert_eq!(json, "20.5");
        let money: Money = serde_json::from_str("10.0").unwrap();
        assert_eq!(money, Money::from_minor(1000));
    }

    #[test]
    fn test_line_item_total_price() {
        let item = LineItem::new("A1", 2, Money::from_major(10.0));
        assert_eq!(item.total_price(), Money::from_major(20.0));
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!(Currency::parse("inr").unwrap().code(), "INR");
        assert_eq!(Currency::parse(" usd ").unwrap().code(), "USD");
        assert!(Currency::parse("RUPEE").is_none());
        assert!(Currency::parse("12A").is_none());
        assert_eq!(Currency::default().code(), DEFAULT_CURRENCY);
    }

    #[test]
    fn test_address_uses_camel_case_on_the_wire() {
        let address = Address::new("1 MG Road", "Bengaluru", "IN", "560001");
        let json = serde_json::to_value(&address).unwrap();
        assert_eq!(json["postalCode"], "560001");
        assert_eq!(json["line1"], "1 MG Road");
    }
}
