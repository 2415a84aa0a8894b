//! Bounded polling for PIX settlement.
//!
//! [`PollState`] is a pure state machine: feed it the result of each poll and
//! it says whether to sleep and poll again or stop with a [`PollOutcome`].
//! [`poll_payment`] drives it against a [`PaymentStatusSource`] as a stream
//! of [`PollEvent`]s.
//!
//! Guarantees:
//! - at most `max_attempts` provider calls, transient failures included
//! - nothing is polled after the first terminal status
//! - the stream yields exactly one `Finished` event, as its last item
//! - dropping the stream between polls issues no further calls

use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use serde::Serialize;

use loja_core::{PaymentId, PaymentStatus};

use super::{PaymentError, PaymentStatusSource};
use crate::config::PollConfig;

/// Why polling gave up without a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnconfirmedReason {
    /// Every attempt answered `pending`.
    AttemptsExhausted,
    /// Too many consecutive transient failures.
    ProviderUnreachable,
    /// The provider gave a definitive error (unknown payment, bad key).
    ProviderError,
}

/// How polling ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Approved,
    Rejected,
    Expired,
    /// We could not confirm either way; distinct from a failed payment.
    Unconfirmed { reason: UnconfirmedReason },
}

impl PollOutcome {
    /// The terminal payment status behind this outcome, if one was observed.
    #[must_use]
    pub const fn payment_status(self) -> Option<PaymentStatus> {
        match self {
            Self::Approved => Some(PaymentStatus::Approved),
            Self::Rejected => Some(PaymentStatus::Rejected),
            Self::Expired => Some(PaymentStatus::Expired),
            Self::Unconfirmed { .. } => None,
        }
    }

    const fn from_terminal(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Pending => None,
            PaymentStatus::Approved => Some(Self::Approved),
            PaymentStatus::Rejected => Some(Self::Rejected),
            PaymentStatus::Expired => Some(Self::Expired),
        }
    }
}

/// What the caller should do after feeding a poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Sleep for the given delay, then poll again.
    Wait(Duration),
    /// Stop polling.
    Finish(PollOutcome),
}

/// Item emitted by [`poll_payment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollEvent {
    /// A poll returned `pending` (or failed transiently); still waiting.
    Waiting { attempt: u32 },
    /// Polling stopped.
    Finished(PollOutcome),
}

/// Poll bookkeeping.
#[derive(Debug, Clone)]
pub struct PollState {
    config: PollConfig,
    attempts: u32,
    consecutive_failures: u32,
    finished: bool,
}

impl PollState {
    #[must_use]
    pub const fn new(config: PollConfig) -> Self {
        Self {
            config,
            attempts: 0,
            consecutive_failures: 0,
            finished: false,
        }
    }

    /// Provider calls made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another provider call is allowed.
    #[must_use]
    pub const fn may_poll(&self) -> bool {
        !self.finished && self.attempts < self.config.max_attempts
    }

    /// Outcome when no poll is allowed before any terminal status.
    #[must_use]
    pub fn exhausted(&mut self) -> PollOutcome {
        self.finished = true;
        PollOutcome::Unconfirmed {
            reason: UnconfirmedReason::AttemptsExhausted,
        }
    }

    /// Record the result of one provider call.
    pub fn record(&mut self, result: Result<PaymentStatus, &PaymentError>) -> PollStep {
        self.attempts = self.attempts.saturating_add(1);

        let step = match result {
            Ok(status) => {
                self.consecutive_failures = 0;
                match PollOutcome::from_terminal(status) {
                    Some(outcome) => PollStep::Finish(outcome),
                    None => self.next_or_exhausted(self.config.interval),
                }
            }
            Err(err) if err.is_transient() => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.config.max_transient_failures {
                    PollStep::Finish(PollOutcome::Unconfirmed {
                        reason: UnconfirmedReason::ProviderUnreachable,
                    })
                } else {
                    self.next_or_exhausted(self.backoff())
                }
            }
            Err(_) => PollStep::Finish(PollOutcome::Unconfirmed {
                reason: UnconfirmedReason::ProviderError,
            }),
        };

        if matches!(step, PollStep::Finish(_)) {
            self.finished = true;
        }
        step
    }

    fn next_or_exhausted(&mut self, delay: Duration) -> PollStep {
        if self.attempts < self.config.max_attempts {
            PollStep::Wait(delay)
        } else {
            PollStep::Finish(self.exhausted())
        }
    }

    /// `interval * 2^failures`, capped at `max_backoff`.
    fn backoff(&self) -> Duration {
        let factor = 1_u32
            .checked_shl(self.consecutive_failures)
            .unwrap_or(u32::MAX);
        self.config
            .interval
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }
}

/// Poll a payment until it settles or the ceilings are hit.
///
/// The first poll happens immediately. Between polls the stream awaits a
/// `tokio::time::sleep`; dropping the stream drops that sleep, so no poll
/// is issued after cancellation.
pub fn poll_payment<S>(
    source: S,
    payment_id: PaymentId,
    config: PollConfig,
) -> impl Stream<Item = PollEvent> + Send
where
    S: PaymentStatusSource + 'static,
{
    stream! {
        let mut state = PollState::new(config);

        loop {
            if !state.may_poll() {
                yield PollEvent::Finished(state.exhausted());
                break;
            }

            let result = source.payment_status(&payment_id).await;
            let step = match &result {
                Ok(intent) => state.record(Ok(intent.status)),
                Err(err) => {
                    tracing::warn!(
                        payment_id = %payment_id,
                        attempt = state.attempts() + 1,
                        transient = err.is_transient(),
                        error = %err,
                        "Payment status query failed"
                    );
                    state.record(Err(err))
                }
            };

            match step {
                PollStep::Finish(outcome) => {
                    tracing::info!(
                        payment_id = %payment_id,
                        attempts = state.attempts(),
                        outcome = ?outcome,
                        "Payment polling finished"
                    );
                    yield PollEvent::Finished(outcome);
                    break;
                }
                PollStep::Wait(delay) => {
                    yield PollEvent::Waiting { attempt: state.attempts() };
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32, max_transient_failures: u32) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(100),
            max_attempts,
            max_transient_failures,
            max_backoff: Duration::from_millis(350),
        }
    }

    fn transient() -> PaymentError {
        PaymentError::RateLimited(1)
    }

    #[test]
    fn test_pending_waits_interval() {
        let mut state = PollState::new(config(5, 3));
        assert_eq!(
            state.record(Ok(PaymentStatus::Pending)),
            PollStep::Wait(Duration::from_millis(100))
        );
        assert!(state.may_poll());
    }

    #[test]
    fn test_terminal_status_finishes() {
        let mut state = PollState::new(config(5, 3));
        assert_eq!(
            state.record(Ok(PaymentStatus::Approved)),
            PollStep::Finish(PollOutcome::Approved)
        );
        assert!(!state.may_poll());

        let mut state = PollState::new(config(5, 3));
        assert_eq!(
            state.record(Ok(PaymentStatus::Expired)),
            PollStep::Finish(PollOutcome::Expired)
        );
    }

    #[test]
    fn test_attempt_ceiling() {
        let mut state = PollState::new(config(2, 3));
        assert!(matches!(
            state.record(Ok(PaymentStatus::Pending)),
            PollStep::Wait(_)
        ));
        assert_eq!(
            state.record(Ok(PaymentStatus::Pending)),
            PollStep::Finish(PollOutcome::Unconfirmed {
                reason: UnconfirmedReason::AttemptsExhausted
            })
        );
        assert_eq!(state.attempts(), 2);
        assert!(!state.may_poll());
    }

    #[test]
    fn test_transient_backoff_doubles_and_caps() {
        let mut state = PollState::new(config(10, 5));
        let err = transient();
        assert_eq!(
            state.record(Err(&err)),
            PollStep::Wait(Duration::from_millis(200))
        );
        assert_eq!(
            state.record(Err(&err)),
            PollStep::Wait(Duration::from_millis(350))
        );
        assert_eq!(
            state.record(Err(&err)),
            PollStep::Wait(Duration::from_millis(350))
        );
    }

    #[test]
    fn test_pending_resets_transient_count() {
        let mut state = PollState::new(config(10, 2));
        let err = transient();
        assert!(matches!(state.record(Err(&err)), PollStep::Wait(_)));
        assert!(matches!(
            state.record(Ok(PaymentStatus::Pending)),
            PollStep::Wait(_)
        ));
        assert!(matches!(state.record(Err(&err)), PollStep::Wait(_)));
        assert_eq!(
            state.record(Err(&err)),
            PollStep::Finish(PollOutcome::Unconfirmed {
                reason: UnconfirmedReason::ProviderUnreachable
            })
        );
    }

    #[test]
    fn test_definitive_error_stops_immediately() {
        let mut state = PollState::new(config(10, 5));
        let err = PaymentError::Status {
            status: 404,
            message: "No such payment_intent".to_owned(),
        };
        assert_eq!(
            state.record(Err(&err)),
            PollStep::Finish(PollOutcome::Unconfirmed {
                reason: UnconfirmedReason::ProviderError
            })
        );
    }

    #[test]
    fn test_zero_attempts_is_exhausted_without_polling() {
        let state = PollState::new(config(0, 5));
        assert!(!state.may_poll());
    }

    #[test]
    fn test_event_json_shape() {
        let waiting = serde_json::to_value(PollEvent::Waiting { attempt: 3 }).ok();
        assert_eq!(
            waiting,
            Some(serde_json::json!({"state": "waiting", "attempt": 3}))
        );

        let done = serde_json::to_value(PollEvent::Finished(PollOutcome::Unconfirmed {
            reason: UnconfirmedReason::AttemptsExhausted,
        }))
        .ok();
        assert_eq!(
            done,
            Some(serde_json::json!({
                "state": "finished",
                "outcome": "unconfirmed",
                "reason": "attempts_exhausted"
            }))
        );
    }
}
