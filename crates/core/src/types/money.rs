//! Money in integer minor currency units.
//!
//! Amounts are stored as `u64` counts of the currency's smallest unit (cents
//! for USD). Decimal rendering via `rust_decimal` only happens at the edges,
//! for providers whose APIs take `"50.00"` style strings.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Errors converting between decimal and minor-unit amounts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// The decimal amount is negative.
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    /// The decimal amount has more fractional digits than the currency allows.
    #[error("amount {0} has sub-minor-unit precision")]
    SubMinorPrecision(Decimal),
    /// The amount does not fit into the minor-unit representation.
    #[error("amount {0} is out of range")]
    OutOfRange(Decimal),
    /// The currency code is not supported.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// ISO 4217 currency codes accepted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Upper-case ISO code (`"USD"`).
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        }
    }

    /// Number of decimal places in the currency's major unit.
    ///
    /// Every supported currency uses cents.
    #[must_use]
    pub const fn minor_unit_exponent(self) -> u32 {
        2
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CurrencyCode {
    type Err = MoneyError;

    /// Parses an ISO code case-insensitively; Stripe reports `"usd"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            _ => Err(MoneyError::UnsupportedCurrency(s.to_owned())),
        }
    }
}

/// An amount of money in minor units of a single currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    /// Amount in the currency's smallest unit.
    pub amount_minor_units: u64,
    /// ISO 4217 currency code.
    pub currency: CurrencyCode,
}

impl Money {
    /// Create an amount from minor units.
    #[must_use]
    pub const fn from_minor(amount_minor_units: u64, currency: CurrencyCode) -> Self {
        Self {
            amount_minor_units,
            currency,
        }
    }

    /// Convert a major-unit decimal (`50.00`) into minor units.
    ///
    /// # Errors
    ///
    /// Fails if the value is negative, has more fractional digits than the
    /// currency allows, or does not fit into `u64`.
    pub fn from_decimal(value: Decimal, currency: CurrencyCode) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative(value));
        }
        let factor = Decimal::from(10_u64.pow(currency.minor_unit_exponent()));
        let scaled = value
            .checked_mul(factor)
            .ok_or(MoneyError::OutOfRange(value))?;
        if !scaled.fract().is_zero() {
            return Err(MoneyError::SubMinorPrecision(value));
        }
        let amount = scaled.to_u64().ok_or(MoneyError::OutOfRange(value))?;
        Ok(Self::from_minor(amount, currency))
    }

    /// Parse a provider-style decimal string (`"50.00"`).
    ///
    /// # Errors
    ///
    /// Fails if the string is not a decimal or fails [`Money::from_decimal`].
    pub fn parse_decimal(value: &str, currency: CurrencyCode) -> Result<Self, MoneyError> {
        let decimal = Decimal::from_str(value.trim())
            .map_err(|_| MoneyError::OutOfRange(Decimal::ZERO))?;
        Self::from_decimal(decimal, currency)
    }

    /// The amount in major units with the currency's scale (`50.00`).
    ///
    /// # Errors
    ///
    /// Fails if the amount exceeds the range `Decimal` can represent from `i64`.
    pub fn to_decimal(&self) -> Result<Decimal, MoneyError> {
        let amount = i64::try_from(self.amount_minor_units)
            .map_err(|_| MoneyError::OutOfRange(Decimal::from(self.amount_minor_units)))?;
        Ok(Decimal::new(amount, self.currency.minor_unit_exponent()))
    }

    /// Render for provider APIs that take a decimal string, always with the
    /// currency's full scale (`"50.00"`, never `"50"`).
    ///
    /// # Errors
    ///
    /// See [`Money::to_decimal`].
    pub fn to_decimal_string(&self) -> Result<String, MoneyError> {
        let decimal = self.to_decimal()?;
        Ok(format!(
            "{:.*}",
            self.currency.minor_unit_exponent() as usize,
            decimal
        ))
    }

    /// Add two amounts of the same currency.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        if self.currency != other.currency {
            return None;
        }
        Some(Self::from_minor(
            self.amount_minor_units.checked_add(other.amount_minor_units)?,
            self.currency,
        ))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal_string() {
            Ok(amount) => write!(f, "{}{amount}", self.currency.symbol()),
            Err(_) => write!(f, "{} {}", self.amount_minor_units, self.currency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_string_keeps_scale() {
        let money = Money::from_minor(5000, CurrencyCode::USD);
        assert_eq!(money.to_decimal_string().unwrap(), "50.00");
        assert_eq!(
            Money::from_minor(7, CurrencyCode::USD)
                .to_decimal_string()
                .unwrap(),
            "0.07"
        );
    }

    #[test]
    fn test_parse_decimal() {
        let money = Money::parse_decimal("40.00", CurrencyCode::USD).unwrap();
        assert_eq!(money.amount_minor_units, 4000);
        let money = Money::parse_decimal("12.5", CurrencyCode::USD).unwrap();
        assert_eq!(money.amount_minor_units, 1250);
    }

    #[test]
    fn test_parse_decimal_rejects_fractions_of_a_cent() {
        assert!(matches!(
            Money::parse_decimal("1.005", CurrencyCode::USD),
            Err(MoneyError::SubMinorPrecision(_))
        ));
    }

    #[test]
    fn test_parse_decimal_rejects_negative() {
        assert!(matches!(
            Money::parse_decimal("-1.00", CurrencyCode::USD),
            Err(MoneyError::Negative(_))
        ));
    }

    #[test]
    fn test_currency_from_str_is_case_insensitive() {
        assert_eq!("usd".parse::<CurrencyCode>().unwrap(), CurrencyCode::USD);
        assert!("XYZ".parse::<CurrencyCode>().is_err());
    }

    #[test]
    fn test_checked_add_requires_same_currency() {
        let usd = Money::from_minor(100, CurrencyCode::USD);
        let eur = Money::from_minor(100, CurrencyCode::EUR);
        assert!(usd.checked_add(eur).is_none());
        assert_eq!(usd.checked_add(usd).unwrap().amount_minor_units, 200);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Money::from_minor(2500, CurrencyCode::USD).to_string(),
            "$25.00"
        );
    }
}
