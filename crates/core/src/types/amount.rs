//! Monetary amounts using decimal arithmetic.
//!
//! Prices and order totals are kept in the currency's standard unit (rupees,
//! dollars) with at most two fractional digits. Payment providers want integer
//! minor units, see [`Amount::minor_units`].

use core::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Errors produced when building an [`Amount`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// Negative values are never valid prices or totals.
    #[error("amount cannot be negative")]
    Negative,
    /// More than two fractional digits.
    #[error("amount cannot have more than two decimal places")]
    TooPrecise,
    /// Larger than [`Amount::MAX`] or than provider minor units can hold.
    #[error("amount is too large")]
    Overflow,
}

/// A non-negative amount of money with at most two decimal places.
///
/// Serialises as a JSON number-like string via `rust_decimal`'s
/// `serde-with-str` support and accepts both numbers and strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest storable amount, 9,999,999,999.99 (`NUMERIC(12, 2)`).
    pub const MAX: Self = Self(Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2));

    /// Build an amount from a decimal value.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Negative`], [`AmountError::TooPrecise`] or
    /// [`AmountError::Overflow`] above [`Amount::MAX`].
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative);
        }
        let normalized = value.normalize();
        if normalized.scale() > 2 {
            return Err(AmountError::TooPrecise);
        }
        if normalized > Self::MAX.0 {
            return Err(AmountError::Overflow);
        }
        Ok(Self(normalized))
    }

    /// Build an amount from a whole number of standard units.
    #[must_use]
    pub fn from_units(units: u32) -> Self {
        Self(Decimal::from(units))
    }

    /// The underlying decimal value.
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Multiply a unit price by a line quantity.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] if the product exceeds [`Amount::MAX`].
    pub fn times(&self, quantity: u32) -> Result<Self, AmountError> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .ok_or(AmountError::Overflow)
            .and_then(Self::new)
    }

    /// Add two amounts.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] if the sum exceeds [`Amount::MAX`].
    pub fn checked_add(&self, other: Self) -> Result<Self, AmountError> {
        self.0
            .checked_add(other.0)
            .ok_or(AmountError::Overflow)
            .and_then(Self::new)
    }

    /// Value in minor units (paise, cents) as expected by payment providers.
    ///
    /// # Errors
    ///
    /// Returns [`AmountError::Overflow`] if the value does not fit in `i64`.
    pub fn minor_units(&self) -> Result<i64, AmountError> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|minor| minor.round().to_i64())
            .ok_or(AmountError::Overflow)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Amount {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Amount {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let decimal = <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::new(decimal)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Amount {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use core::str::FromStr;

    use super::*;

    fn amount(s: &str) -> Result<Amount, AmountError> {
        Amount::new(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_rejects_negative_and_precise_values() {
        assert_eq!(amount("-1"), Err(AmountError::Negative));
        assert_eq!(amount("1.005"), Err(AmountError::TooPrecise));
        assert!(amount("1.50").is_ok());
        assert!(amount("1.500").is_ok());
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(amount("299").unwrap().minor_units().unwrap(), 29_900);
        assert_eq!(amount("19.99").unwrap().minor_units().unwrap(), 1_999);
    }

    #[test]
    fn test_line_totals_and_sum() {
        let line = amount("98").unwrap().times(5).unwrap();
        let total = line.checked_add(Amount::from_units(10)).unwrap();
        assert_eq!(total, Amount::from_units(500));
    }

    #[test]
    fn test_max_matches_storage_precision() {
        assert_eq!(Amount::MAX.to_string(), "9999999999.99");
        assert_eq!(amount("9999999999.99").unwrap(), Amount::MAX);
        assert_eq!(amount("10000000000"), Err(AmountError::Overflow));
    }

    #[test]
    fn test_arithmetic_overflow_is_an_error() {
        assert_eq!(
            Amount::from_units(1000).times(10_000_000),
            Err(AmountError::Overflow)
        );
        assert_eq!(Amount::MAX.times(u32::MAX), Err(AmountError::Overflow));
        assert_eq!(
            Amount::MAX.checked_add(Amount::from_units(1)),
            Err(AmountError::Overflow)
        );
        assert_eq!(
            Amount::MAX.minor_units().unwrap(),
            999_999_999_999
        );
    }

    #[test]
    fn test_minor_units_of_huge_decimal_reports_overflow() {
        let huge = Amount(Decimal::from_str("1000000000000000000000000000").unwrap());
        assert_eq!(huge.minor_units(), Err(AmountError::Overflow));
    }

    #[test]
    fn test_equality_ignores_trailing_zeros() {
        assert_eq!(amount("500.00").unwrap(), Amount::from_units(500));
    }

    #[test]
    fn test_deserializes_numbers_and_strings() {
        let from_number: Amount = serde_json::from_str("599").unwrap();
        let from_string: Amount = serde_json::from_str("\"599.00\"").unwrap();
        assert_eq!(from_number, from_string);

        let negative: Result<Amount, _> = serde_json::from_str("-5");
        assert!(negative.is_err());
    }
}
