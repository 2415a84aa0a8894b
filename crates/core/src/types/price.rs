//! Type-safe price representation using decimal arithmetic.

use core::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// ISO 4217 currencies the shop can charge in.
///
/// PIX settles only in reais, so BRL is the default and the only currency the
/// checkout accepts today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Brl,
    Usd,
}

impl Currency {
    /// Lowercase ISO code, as the payment provider expects it.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Brl => "brl",
            Self::Usd => "usd",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Brl => "R$",
            Self::Usd => "$",
        }
    }
}

/// A price in the currency's standard unit (reais, not centavos).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// A zero BRL price.
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(Decimal::ZERO, Currency::Brl)
    }

    /// Create a BRL price from centavos.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self::new(Decimal::new(cents, 2), Currency::Brl)
    }

    /// Amount in the smallest currency unit, rounded half-even.
    ///
    /// Returns `None` if the amount does not fit in an `i64`.
    #[must_use]
    pub fn to_cents(&self) -> Option<i64> {
        (self.amount * Decimal::ONE_HUNDRED).round().to_i64()
    }

    /// Multiply by a line quantity.
    #[must_use]
    pub fn times(&self, quantity: u8) -> Self {
        Self::new(self.amount * Decimal::from(quantity), self.currency)
    }

    /// Add another price of the same currency.
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        Self::new(self.amount + other.amount, self.currency)
    }
}

impl fmt::Display for Price {
    /// Brazilian formatting: `R$ 1.234,50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = self.amount.round_dp(2);
        let negative = rounded.is_sign_negative();
        let text = format!("{:.2}", rounded.abs());
        let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, c) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(c);
        }

        let sign = if negative { "-" } else { "" };
        write!(f, "{} {sign}{grouped},{frac}", self.currency.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_brazilian_format() {
        assert_eq!(Price::from_cents(123_450).to_string(), "R$ 1.234,50");
        assert_eq!(Price::from_cents(990).to_string(), "R$ 9,90");
        assert_eq!(Price::from_cents(100_000_000).to_string(), "R$ 1.000.000,00");
        assert_eq!(Price::zero().to_string(), "R$ 0,00");
    }

    #[test]
    fn test_cents_round_trip_and_arithmetic() {
        let unit = Price::from_cents(1_999);
        assert_eq!(unit.times(3).to_cents(), Some(5_997));
        assert_eq!(unit.plus(&Price::from_cents(1)).to_cents(), Some(2_000));
    }
}
