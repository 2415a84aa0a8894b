//! PIX confirmation polling against a scripted provider.
//!
//! Tests run on a paused clock, so poll intervals elapse instantly.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use loja_core::{PaymentId, PaymentStatus};
use loja_integration_tests::{ScriptedProvider, definitive_error, transient_error};
use loja_storefront::config::PollConfig;
use loja_storefront::services::payments::{
    PollEvent, PollOutcome, UnconfirmedReason, poll_payment,
};

fn config(max_attempts: u32, max_transient_failures: u32) -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(100),
        max_attempts,
        max_transient_failures,
        max_backoff: Duration::from_secs(1),
    }
}

fn payment() -> PaymentId {
    PaymentId::parse("pi_test_123").unwrap()
}

async fn run(provider: &Arc<ScriptedProvider>, config: PollConfig) -> Vec<PollEvent> {
    poll_payment(Arc::clone(provider), payment(), config)
        .collect()
        .await
}

fn unconfirmed(reason: UnconfirmedReason) -> PollEvent {
    PollEvent::Finished(PollOutcome::Unconfirmed { reason })
}

#[tokio::test(start_paused = true)]
async fn test_pending_then_approved() {
    let provider = Arc::new(ScriptedProvider::new([
        Ok(PaymentStatus::Pending),
        Ok(PaymentStatus::Pending),
        Ok(PaymentStatus::Pending),
        Ok(PaymentStatus::Approved),
    ]));

    let events = run(&provider, config(10, 3)).await;

    assert_eq!(
        events,
        vec![
            PollEvent::Waiting { attempt: 1 },
            PollEvent::Waiting { attempt: 2 },
            PollEvent::Waiting { attempt: 3 },
            PollEvent::Finished(PollOutcome::Approved),
        ]
    );
    assert_eq!(provider.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_nothing_is_polled_after_a_terminal_status() {
    for (status, outcome) in [
        (PaymentStatus::Rejected, PollOutcome::Rejected),
        (PaymentStatus::Expired, PollOutcome::Expired),
    ] {
        let provider = Arc::new(ScriptedProvider::new([Ok(status)]));

        let events = run(&provider, config(10, 3)).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(events, vec![PollEvent::Finished(outcome)]);
        assert_eq!(provider.calls(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_attempt_ceiling_ends_unconfirmed() {
    let provider = Arc::new(ScriptedProvider::default());

    let events = run(&provider, config(5, 3)).await;

    assert_eq!(events.len(), 5);
    assert_eq!(
        events.last(),
        Some(&unconfirmed(UnconfirmedReason::AttemptsExhausted))
    );
    assert_eq!(provider.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_count_toward_the_attempt_ceiling() {
    let provider = Arc::new(ScriptedProvider::new([
        Err(transient_error()),
        Ok(PaymentStatus::Pending),
        Err(transient_error()),
        Ok(PaymentStatus::Pending),
    ]));

    let events = run(&provider, config(4, 3)).await;

    assert_eq!(
        events.last(),
        Some(&unconfirmed(UnconfirmedReason::AttemptsExhausted))
    );
    assert_eq!(provider.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_transient_failures_end_unconfirmed() {
    let provider = Arc::new(ScriptedProvider::new([
        Err(transient_error()),
        Err(transient_error()),
        Err(transient_error()),
    ]));

    let events = run(&provider, config(10, 3)).await;

    assert_eq!(
        events,
        vec![
            PollEvent::Waiting { attempt: 1 },
            PollEvent::Waiting { attempt: 2 },
            unconfirmed(UnconfirmedReason::ProviderUnreachable),
        ]
    );
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_failure() {
    let provider = Arc::new(ScriptedProvider::new([
        Err(transient_error()),
        Ok(PaymentStatus::Pending),
        Ok(PaymentStatus::Approved),
    ]));

    let events = run(&provider, config(10, 2)).await;

    assert_eq!(
        events.last(),
        Some(&PollEvent::Finished(PollOutcome::Approved))
    );
    assert_eq!(provider.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_after_each_failure() {
    let provider = Arc::new(ScriptedProvider::new([
        Err(transient_error()),
        Err(transient_error()),
        Ok(PaymentStatus::Approved),
    ]));

    let started = Instant::now();
    run(&provider, config(10, 5)).await;
    let elapsed = started.elapsed();

    // 200ms after the first failure, 400ms after the second.
    assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_definitive_error_stops_without_retry() {
    let provider = Arc::new(ScriptedProvider::new([Err(definitive_error())]));

    let events = run(&provider, config(10, 3)).await;

    assert_eq!(events, vec![unconfirmed(UnconfirmedReason::ProviderError)]);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_stream_stops_polling() {
    let provider = Arc::new(ScriptedProvider::default());

    let mut polls = Box::pin(poll_payment(Arc::clone(&provider), payment(), config(10, 3)));
    assert_eq!(polls.next().await, Some(PollEvent::Waiting { attempt: 1 }));
    drop(polls);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(provider.calls(), 1);
}
