//! Status enums for orders and payments.

use serde::{Deserialize, Serialize};

/// Lifecycle of an order placed through checkout.
///
/// Orders start `Pending` and move at most once to a terminal state; the
/// storage layer only applies transitions out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "storefront.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Expired,
}

impl OrderStatus {
    /// Whether the order can still change state.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Label shown on the account page.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Aguardando pagamento",
            Self::Paid => "Pago",
            Self::Failed => "Pagamento recusado",
            Self::Expired => "Expirado",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Payment status as observed from the payment provider.
///
/// Only the provider mutates a payment; we classify what it reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Waiting for the buyer to pay the PIX code.
    Pending,
    /// Funds settled.
    Approved,
    /// The provider refused or cancelled the payment.
    Rejected,
    /// The PIX code expired before being paid.
    Expired,
}

impl PaymentStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The order status a terminal payment status settles the order into.
    #[must_use]
    pub const fn settled_order_status(self) -> Option<OrderStatus> {
        match self {
            Self::Pending => None,
            Self::Approved => Some(OrderStatus::Paid),
            Self::Rejected => Some(OrderStatus::Failed),
            Self::Expired => Some(OrderStatus::Expired),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("invalid payment status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Approved.is_terminal());
        assert!(PaymentStatus::Rejected.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
    }

    #[test]
    fn test_settled_order_status() {
        assert_eq!(PaymentStatus::Pending.settled_order_status(), None);
        assert_eq!(
            PaymentStatus::Approved.settled_order_status(),
            Some(OrderStatus::Paid)
        );
        assert_eq!(
            PaymentStatus::Rejected.settled_order_status(),
            Some(OrderStatus::Failed)
        );
        assert_eq!(
            PaymentStatus::Expired.settled_order_status(),
            Some(OrderStatus::Expired)
        );
    }

    #[test]
    fn test_payment_status_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Approved,
            PaymentStatus::Rejected,
            PaymentStatus::Expired,
        ] {
            assert_eq!(status.to_string().parse::<PaymentStatus>(), Ok(status));
        }
        assert!("succeeded".parse::<PaymentStatus>().is_err());
    }
}
