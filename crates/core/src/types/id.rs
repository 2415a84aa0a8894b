//! Newtype IDs for type-safe entity references.
//!
//! Database rows are keyed by `SERIAL` integers, wrapped by [`define_id!`].
//! Identifiers issued by the payment provider are opaque strings
//! ([`PaymentId`]) and guest carts are tagged by a random [`GuestCartToken`].

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when parsing an identifier from user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input was empty or whitespace.
    #[error("identifier cannot be empty")]
    Empty,
    /// The input was not a positive integer.
    #[error("identifier must be a positive integer, got {0:?}")]
    Malformed(String),
}

/// Macro to define a type-safe integer ID wrapper.
///
/// Creates a newtype wrapper around `i32` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `Copy`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - `new()`, `as_i32()` and a strict `FromStr` that only accepts positive integers
/// - `sqlx` `Type`, `Encode`, and `Decode` implementations (with `postgres` feature)
///
/// # Example
///
/// ```rust
/// # use loja_core::define_id;
/// define_id!(AddressId);
///
/// let id: AddressId = "42".parse().unwrap();
/// assert_eq!(id.as_i32(), 42);
/// assert!("-1".parse::<AddressId>().is_err());
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            /// Create a new ID from an i32 value.
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            /// Get the underlying i32 value.
            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }

            /// Whether this ID could have been issued by the database.
            #[must_use]
            pub const fn is_well_formed(&self) -> bool {
                self.0 > 0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ::core::str::FromStr for $name {
            type Err = $crate::types::id::IdError;

            fn from_str(s: &str) -> ::core::result::Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err($crate::types::id::IdError::Empty);
                }
                match trimmed.parse::<i32>() {
                    Ok(id) if id > 0 => Ok(Self(id)),
                    _ => Err($crate::types::id::IdError::Malformed(trimmed.to_owned())),
                }
            }
        }

        impl From<i32> for $name {
            fn from(id: i32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Type<::sqlx::Postgres> for $name {
            fn type_info() -> ::sqlx::postgres::PgTypeInfo {
                <i32 as ::sqlx::Type<::sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &::sqlx::postgres::PgTypeInfo) -> bool {
                <i32 as ::sqlx::Type<::sqlx::Postgres>>::compatible(ty)
            }
        }

        #[cfg(feature = "postgres")]
        impl<'r> ::sqlx::Decode<'r, ::sqlx::Postgres> for $name {
            fn decode(
                value: ::sqlx::postgres::PgValueRef<'r>,
            ) -> ::core::result::Result<Self, ::sqlx::error::BoxDynError> {
                let id = <i32 as ::sqlx::Decode<::sqlx::Postgres>>::decode(value)?;
                Ok(Self(id))
            }
        }

        #[cfg(feature = "postgres")]
        impl ::sqlx::Encode<'_, ::sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut ::sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
                <i32 as ::sqlx::Encode<::sqlx::Postgres>>::encode_by_ref(&self.0, buf)
            }
        }
    };
}

define_id!(UserId);
define_id!(ProductId);
define_id!(OrderId);

/// Payment identifier issued by the payment provider (e.g. `pi_3Q...`).
///
/// Opaque to us; only checked for being non-empty and free of whitespace so it
/// can be embedded in URLs and provider paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(String);

impl PaymentId {
    /// Maximum accepted length.
    pub const MAX_LENGTH: usize = 255;

    /// Parse a payment ID from untrusted input.
    ///
    /// # Errors
    ///
    /// Returns `IdError` if the input is empty, too long, or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        let valid = trimmed.len() <= Self::MAX_LENGTH
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IdError::Malformed(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PaymentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Random tag identifying one guest cart.
///
/// Minted when a guest first adds an item and discarded when the cart is
/// cleared; the merge ledger is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestCartToken(Uuid);

impl GuestCartToken {
    /// Mint a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for GuestCartToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_id_parsing() {
        assert_eq!("7".parse::<ProductId>(), Ok(ProductId::new(7)));
        assert_eq!(" 12 ".parse::<OrderId>(), Ok(OrderId::new(12)));
        assert_eq!("".parse::<ProductId>(), Err(IdError::Empty));
        assert!(matches!(
            "0".parse::<ProductId>(),
            Err(IdError::Malformed(_))
        ));
        assert!(matches!(
            "abc".parse::<ProductId>(),
            Err(IdError::Malformed(_))
        ));
        assert!(!ProductId::new(-3).is_well_formed());
    }

    #[test]
    fn test_payment_id_parsing() {
        assert_eq!(
            PaymentId::parse("pi_3QabcDEF").map(|p| p.to_string()),
            Ok("pi_3QabcDEF".to_string())
        );
        assert_eq!(PaymentId::parse("   "), Err(IdError::Empty));
        assert!(PaymentId::parse("pi 1").is_err());
        assert!(PaymentId::parse("../etc").is_err());
        assert!(PaymentId::parse(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_guest_tokens_are_unique() {
        assert_ne!(GuestCartToken::generate(), GuestCartToken::generate());
    }
}
