//! Order settlement after PIX confirmation, and orders whose PIX code could
//! not be issued.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join;

use loja_core::{OrderId, OrderStatus, PaymentId, PaymentStatus, UserId};
use loja_integration_tests::{MemoryOrders, ScriptedProvider, definitive_error, transient_error};
use loja_storefront::config::PollConfig;
use loja_storefront::models::PaymentIntent;
use loja_storefront::services::checkout::{CheckoutError, confirm_payment, issue_or_abandon};
use loja_storefront::services::payments::{
    PaymentError, PollEvent, PollOutcome, UnconfirmedReason,
};

const BUYER: UserId = UserId::new(7);
const ORDER: i32 = 31;

fn config(max_attempts: u32) -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(100),
        max_attempts,
        max_transient_failures: 3,
        max_backoff: Duration::from_secs(1),
    }
}

fn payment() -> PaymentId {
    PaymentId::parse("pi_settle_1").unwrap()
}

fn orders_with_pending() -> MemoryOrders {
    let orders = MemoryOrders::default();
    orders.pending(ORDER, BUYER, Some(&payment()));
    orders
}

async fn confirm(
    provider: &Arc<ScriptedProvider>,
    orders: &MemoryOrders,
    max_attempts: u32,
) -> Vec<PollEvent> {
    confirm_payment(
        Arc::clone(provider),
        orders,
        OrderId::new(ORDER),
        payment(),
        config(max_attempts),
    )
    .collect()
    .await
}

fn issued(qr: Option<&str>) -> PaymentIntent {
    PaymentIntent {
        id: payment(),
        order_id: Some(OrderId::new(ORDER)),
        status: PaymentStatus::Pending,
        qr: qr.map(String::from),
        expires_at: None,
        provider_status: "requires_action".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_approved_payment_settles_before_finishing() {
    let orders = orders_with_pending();
    let provider = Arc::new(ScriptedProvider::new([
        Ok(PaymentStatus::Pending),
        Ok(PaymentStatus::Approved),
    ]));

    let events = confirm(&provider, &orders, 10).await;

    assert_eq!(
        events.last(),
        Some(&PollEvent::Finished(PollOutcome::Approved))
    );
    assert_eq!(orders.status(ORDER), Some(OrderStatus::Paid));
    assert_eq!(orders.cart_clears(BUYER), 1);
}

#[tokio::test(start_paused = true)]
async fn test_two_approved_streams_clear_the_cart_once() {
    let orders = orders_with_pending();
    let first = Arc::new(ScriptedProvider::new([
        Ok(PaymentStatus::Pending),
        Ok(PaymentStatus::Approved),
    ]));
    let second = Arc::new(ScriptedProvider::new([Ok(PaymentStatus::Approved)]));

    let (a, b) = join(
        confirm(&first, &orders, 10),
        confirm(&second, &orders, 10),
    )
    .await;

    let approved = PollEvent::Finished(PollOutcome::Approved);
    assert_eq!(a.last(), Some(&approved));
    assert_eq!(b.last(), Some(&approved));
    assert_eq!(orders.settle_calls(), 2);
    assert_eq!(orders.cart_clears(BUYER), 1);
    assert_eq!(orders.status(ORDER), Some(OrderStatus::Paid));
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_outcome_settles_nothing() {
    let orders = orders_with_pending();

    let pending = Arc::new(ScriptedProvider::new([]));
    let events = confirm(&pending, &orders, 3).await;
    assert_eq!(
        events.last(),
        Some(&PollEvent::Finished(PollOutcome::Unconfirmed {
            reason: UnconfirmedReason::AttemptsExhausted
        }))
    );

    let broken = Arc::new(ScriptedProvider::new([Err(definitive_error())]));
    let events = confirm(&broken, &orders, 3).await;
    assert_eq!(
        events.last(),
        Some(&PollEvent::Finished(PollOutcome::Unconfirmed {
            reason: UnconfirmedReason::ProviderError
        }))
    );

    assert_eq!(orders.settle_calls(), 0);
    assert_eq!(orders.status(ORDER), Some(OrderStatus::Pending));
    assert_eq!(orders.cart_clears(BUYER), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_and_expired_payments_keep_the_cart() {
    for (status, settled) in [
        (PaymentStatus::Rejected, OrderStatus::Failed),
        (PaymentStatus::Expired, OrderStatus::Expired),
    ] {
        let orders = orders_with_pending();
        let provider = Arc::new(ScriptedProvider::new([Ok(status)]));

        confirm(&provider, &orders, 10).await;

        assert_eq!(orders.status(ORDER), Some(settled));
        assert_eq!(orders.cart_clears(BUYER), 0);
    }
}

#[tokio::test]
async fn test_failed_issuance_closes_the_order() {
    for failure in [transient_error(), definitive_error()] {
        let orders = MemoryOrders::default();
        orders.pending(ORDER, BUYER, None);

        let result =
            issue_or_abandon(&orders, OrderId::new(ORDER), async { Err(failure) }).await;

        assert!(matches!(result, Err(CheckoutError::Payment(_))));
        assert_eq!(orders.status(ORDER), Some(OrderStatus::Failed));
    }
}

#[tokio::test]
async fn test_issuance_without_qr_closes_the_order() {
    let orders = MemoryOrders::default();
    orders.pending(ORDER, BUYER, None);

    let result = issue_or_abandon(&orders, OrderId::new(ORDER), async { Ok(issued(None)) }).await;

    assert!(matches!(
        result,
        Err(CheckoutError::Payment(PaymentError::MissingQrCode(_)))
    ));
    assert_eq!(orders.status(ORDER), Some(OrderStatus::Failed));
}

#[tokio::test]
async fn test_issued_code_leaves_the_order_pending() {
    let orders = MemoryOrders::default();
    orders.pending(ORDER, BUYER, None);

    let (intent, qr) = issue_or_abandon(&orders, OrderId::new(ORDER), async {
        Ok(issued(Some(" 000201pix")))
    })
    .await
    .unwrap();

    assert_eq!(intent.id, payment());
    assert_eq!(qr, " 000201pix");
    assert_eq!(orders.abandon_calls(), 0);
    assert_eq!(orders.status(ORDER), Some(OrderStatus::Pending));
}
