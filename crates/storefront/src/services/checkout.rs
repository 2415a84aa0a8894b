//! Checkout: turn the persisted cart into an order paid with PIX, and settle
//! the order once the payment reaches a terminal status.
//!
//! Every order leaves `pending` exactly once:
//! - the provider reports a terminal status and [`settle_order`] applies it
//! - no PIX code could be issued and [`issue_or_abandon`] fails the order

use std::future::Future;

use async_stream::stream;
use futures::{Stream, StreamExt};
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use loja_core::{OrderId, OrderStatus, PaymentId, PaymentStatus};

use crate::config::PollConfig;
use crate::db::orders::Settlement;
use crate::db::{CartRepository, OrderRepository, RepositoryError};
use crate::models::{CurrentUser, PaymentIntent};
use crate::services::payments::{
    PaymentError, PaymentStatusSource, PixRequest, PollEvent, StripeClient, poll_payment,
};

/// Errors from checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Nothing purchasable in the cart.
    #[error("cart is empty")]
    EmptyCart,

    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Everything the PIX page needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixCheckout {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub qr: String,
}

/// Where orders record how their payment ended.
pub trait OrderSettlement: Send + Sync {
    /// Move a pending order that still references `payment_id` to `status`.
    /// A paid order also drops its products from the buyer's cart.
    fn settle(
        &self,
        order_id: OrderId,
        payment_id: &PaymentId,
        status: OrderStatus,
    ) -> impl Future<Output = Result<Settlement, RepositoryError>> + Send;

    /// Fail a pending order that never got a payment attached.
    fn abandon(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}

impl OrderSettlement for OrderRepository<'_> {
    async fn settle(
        &self,
        order_id: OrderId,
        payment_id: &PaymentId,
        status: OrderStatus,
    ) -> Result<Settlement, RepositoryError> {
        OrderRepository::settle(self, order_id, payment_id, status).await
    }

    async fn abandon(&self, order_id: OrderId) -> Result<bool, RepositoryError> {
        OrderRepository::abandon(self, order_id).await
    }
}

/// Apply a terminal payment status to its order.
///
/// Only the first caller for an order moves it out of `pending`; later
/// callers (another tab, a retried poll) get `Settlement::Unchanged`.
///
/// # Errors
///
/// Returns `RepositoryError` if the update fails.
pub async fn settle_order<S: OrderSettlement>(
    orders: &S,
    order_id: OrderId,
    payment_id: &PaymentId,
    status: PaymentStatus,
) -> Result<Settlement, RepositoryError> {
    let Some(order_status) = status.settled_order_status() else {
        return Ok(Settlement::Unchanged);
    };

    let settlement = orders.settle(order_id, payment_id, order_status).await?;

    if let Settlement::Applied { user_id } = settlement {
        tracing::info!(
            order_id = %order_id,
            user_id = %user_id,
            status = %order_status,
            "Order settled"
        );
    }

    Ok(settlement)
}

/// Await the provider call issuing an order's PIX code.
///
/// If it fails or comes back without a QR payload, the order is marked
/// `failed` so it does not stay open without a payment to settle it.
///
/// # Errors
///
/// Returns `CheckoutError::Payment` with the provider failure.
pub async fn issue_or_abandon<S, F>(
    orders: &S,
    order_id: OrderId,
    issue: F,
) -> Result<(PaymentIntent, String), CheckoutError>
where
    S: OrderSettlement,
    F: Future<Output = Result<PaymentIntent, PaymentError>>,
{
    let issued = issue.await.and_then(|intent| match intent.qr.clone() {
        Some(qr) => Ok((intent, qr)),
        None => Err(PaymentError::MissingQrCode(intent.id.to_string())),
    });

    let err = match issued {
        Ok(issued) => return Ok(issued),
        Err(err) => err,
    };

    match orders.abandon(order_id).await {
        Ok(true) => {
            tracing::warn!(order_id = %order_id, error = %err, "PIX code not issued, order failed");
        }
        Ok(false) => {}
        Err(e) => {
            tracing::error!(order_id = %order_id, error = %e, "Failed to close order without payment");
        }
    }

    Err(CheckoutError::Payment(err))
}

/// Poll a payment and settle its order on the first terminal status.
///
/// Yields the poller's events unchanged. The order is settled before the
/// `Finished` event is yielded; an unconfirmed outcome settles nothing. A
/// settlement failure is logged and the event is still delivered.
pub fn confirm_payment<'a, P, S>(
    source: P,
    orders: &'a S,
    order_id: OrderId,
    payment_id: PaymentId,
    config: PollConfig,
) -> impl Stream<Item = PollEvent> + Send + 'a
where
    P: PaymentStatusSource + 'static,
    S: OrderSettlement,
{
    stream! {
        let mut polls = Box::pin(poll_payment(source, payment_id.clone(), config));

        while let Some(event) = polls.next().await {
            if let PollEvent::Finished(outcome) = event
                && let Some(status) = outcome.payment_status()
                && let Err(e) = settle_order(orders, order_id, &payment_id, status).await
            {
                tracing::error!(order_id = %order_id, error = %e, "Failed to settle order");
            }
            yield event;
        }
    }
}

/// Checkout flow over the database and the payment provider.
pub struct CheckoutService<'a> {
    pool: &'a PgPool,
    payments: &'a StripeClient,
}

impl<'a> CheckoutService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, payments: &'a StripeClient) -> Self {
        Self { pool, payments }
    }

    /// Create a pending order from the user's cart and issue its PIX code.
    ///
    /// The cart is left untouched; it is cleared when the payment is approved.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::EmptyCart` if no cart line can be bought.
    /// Returns `CheckoutError::Payment` if the provider call fails; the order
    /// is then marked `failed`.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start_pix(&self, user: &CurrentUser) -> Result<PixCheckout, CheckoutError> {
        let lines = CartRepository::new(self.pool).lines(user.id).await?;

        let orders = OrderRepository::new(self.pool);
        let order = orders
            .create_pending(user.id, &lines)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => CheckoutError::EmptyCart,
                other => CheckoutError::Repository(other),
            })?;

        let request = PixRequest {
            order_id: order.id,
            amount: order.total,
            email: user.email.clone(),
        };
        let (payment, qr) =
            issue_or_abandon(&orders, order.id, self.payments.create_pix_payment(&request)).await?;

        if !orders
            .attach_payment(order.id, &payment.id, &qr, payment.expires_at)
            .await?
        {
            tracing::warn!(order_id = %order.id, "Order already had a payment attached");
        }

        tracing::info!(order_id = %order.id, payment_id = %payment.id, total = %order.total, "PIX checkout started");

        Ok(PixCheckout {
            order_id: order.id,
            payment_id: payment.id,
            qr,
        })
    }

    /// Apply a terminal payment status to its order. See [`settle_order`].
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the update fails.
    pub async fn settle(
        &self,
        order_id: OrderId,
        payment_id: &PaymentId,
        status: PaymentStatus,
    ) -> Result<Settlement, CheckoutError> {
        let orders = OrderRepository::new(self.pool);
        Ok(settle_order(&orders, order_id, payment_id, status).await?)
    }
}
