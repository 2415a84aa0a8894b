//! Cart line quantities and the guest-cart merge rule.
//!
//! A persisted cart line holds at most [`Quantity::MAX`] units. Merging a
//! guest cart into a persisted one sums quantities and saturates at the cap,
//! which makes the merge commutative and associative:
//! `min(min(a + b, 99) + c, 99) == min(a + b + c, 99)` for non-negative
//! values, so the order in which carts (or tabs) merge never matters.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Error returned when a requested quantity is outside the allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("quantity must be between {min} and {max}, got {got}")]
    OutOfRange { min: u8, max: u8, got: i64 },
}

/// Number of units of one product in a cart, always within `0..=99`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(u8);

impl Quantity {
    /// Maximum units of a single product in one cart.
    pub const MAX: u8 = 99;

    /// The empty quantity (used by updates to mean "remove the line").
    pub const ZERO: Self = Self(0);

    /// Validate a quantity for an add-to-cart action: `1..=99`.
    ///
    /// # Errors
    ///
    /// Returns `QuantityError::OutOfRange` otherwise.
    pub fn for_addition(value: i64) -> Result<Self, QuantityError> {
        Self::checked(value, 1)
    }

    /// Validate a quantity for an update action: `0..=99`, where zero removes.
    ///
    /// # Errors
    ///
    /// Returns `QuantityError::OutOfRange` otherwise.
    pub fn for_update(value: i64) -> Result<Self, QuantityError> {
        Self::checked(value, 0)
    }

    fn checked(value: i64, min: u8) -> Result<Self, QuantityError> {
        match u8::try_from(value) {
            Ok(v) if (min..=Self::MAX).contains(&v) => Ok(Self(v)),
            _ => Err(QuantityError::OutOfRange {
                min,
                max: Self::MAX,
                got: value,
            }),
        }
    }

    /// Build a quantity from any value by clamping into `0..=99`.
    ///
    /// Used when reading rows written before the cap existed.
    #[must_use]
    pub fn saturating_from(value: i64) -> Self {
        let clamped = value.clamp(0, i64::from(Self::MAX));
        Self(u8::try_from(clamped).unwrap_or(Self::MAX))
    }

    /// Sum two quantities, capped at [`Quantity::MAX`].
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0).min(Self::MAX))
    }

    /// Whether this quantity means "no line".
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<i64> for Quantity {
    type Error = QuantityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::for_update(value)
    }
}

impl From<Quantity> for i64 {
    fn from(q: Quantity) -> Self {
        Self::from(q.0)
    }
}

impl From<Quantity> for i32 {
    fn from(q: Quantity) -> Self {
        Self::from(q.0)
    }
}

/// How much of a guest cart entry still has to be merged.
///
/// `already_applied` is what an earlier (possibly interrupted) reconciliation
/// of the same guest cart recorded for this product. Only the positive
/// difference is applied again, so replaying a reconciliation never counts the
/// same units twice. Returns `None` when there is nothing left to apply.
#[must_use]
pub fn merge_delta(already_applied: Option<Quantity>, incoming: Quantity) -> Option<Quantity> {
    let applied = already_applied.unwrap_or(Quantity::ZERO);
    let delta = incoming.0.checked_sub(applied.0)?;
    (delta > 0).then_some(Quantity(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(v: i64) -> Quantity {
        Quantity::for_update(v).unwrap()
    }

    #[test]
    fn test_validation_ranges() {
        assert!(Quantity::for_addition(0).is_err());
        assert!(Quantity::for_addition(1).is_ok());
        assert!(Quantity::for_addition(99).is_ok());
        assert!(Quantity::for_addition(100).is_err());
        assert!(Quantity::for_addition(-4).is_err());

        assert_eq!(Quantity::for_update(0), Ok(Quantity::ZERO));
        assert_eq!(
            Quantity::for_update(300),
            Err(QuantityError::OutOfRange {
                min: 0,
                max: 99,
                got: 300
            })
        );
    }

    #[test]
    fn test_merge_sums_and_caps() {
        assert_eq!(q(2).merge(q(3)), q(5));
        assert_eq!(q(5).merge(q(97)), q(99));
        assert_eq!(q(99).merge(q(99)), q(99));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let values = [q(40), q(35), q(30), q(1)];
        let forward = values.iter().fold(Quantity::ZERO, |acc, v| acc.merge(*v));
        let backward = values
            .iter()
            .rev()
            .fold(Quantity::ZERO, |acc, v| acc.merge(*v));
        assert_eq!(forward, backward);
        assert_eq!(forward, q(99));
    }

    #[test]
    fn test_merge_delta() {
        assert_eq!(merge_delta(None, q(4)), Some(q(4)));
        assert_eq!(merge_delta(Some(q(4)), q(4)), None);
        assert_eq!(merge_delta(Some(q(4)), q(6)), Some(q(2)));
        assert_eq!(merge_delta(Some(q(6)), q(4)), None);
    }

    #[test]
    fn test_saturating_from() {
        assert_eq!(Quantity::saturating_from(150), q(99));
        assert_eq!(Quantity::saturating_from(-1), Quantity::ZERO);
    }

    #[test]
    fn test_serde_rejects_out_of_range() {
        assert_eq!(serde_json::from_str::<Quantity>("7").unwrap(), q(7));
        assert!(serde_json::from_str::<Quantity>("120").is_err());
        assert_eq!(serde_json::to_string(&q(12)).unwrap(), "12");
    }
}
