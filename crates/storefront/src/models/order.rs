//! Orders and the provider-side payment they are paid with.

use chrono::{DateTime, Utc};

use loja_core::{OrderId, OrderStatus, PaymentId, PaymentStatus, Price, ProductId, UserId};

/// An order placed through checkout.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Price,
    /// Provider payment reference, set once when the PIX code is issued.
    pub payment_id: Option<PaymentId>,
    /// PIX copy-and-paste payload, immutable once set.
    pub pix_qr: Option<String>,
    pub pix_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Whether `payment_id` is the payment issued for this order.
    #[must_use]
    pub fn is_paid_with(&self, payment_id: &PaymentId) -> bool {
        self.payment_id.as_ref() == Some(payment_id)
    }
}

/// Snapshot of a cart line at checkout time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub title: String,
    pub quantity: u8,
    pub unit_price: Price,
}

/// A payment as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: PaymentId,
    /// Our order, echoed back from the payment metadata when present.
    pub order_id: Option<OrderId>,
    pub status: PaymentStatus,
    /// PIX payload; only present while the provider still displays it.
    pub qr: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Raw provider status, kept for logs.
    pub provider_status: String,
}
