//! PIX payments.
//!
//! # Architecture
//!
//! - [`StripeClient`] creates PIX payment intents and reads their status
//! - [`PaymentStatusSource`] is the seam the poller depends on, so tests can
//!   script provider responses
//! - [`poll_payment`] is a bounded state machine driven as a stream; dropping
//!   the stream cancels the pending sleep and no further poll is issued
//!
//! The provider is the only writer of a payment. We observe its status and
//! settle our order from it.

pub mod poller;
pub mod stripe;

use std::future::Future;

use thiserror::Error;

use loja_core::PaymentId;

use crate::models::PaymentIntent;

pub use poller::{PollEvent, PollOutcome, PollState, PollStep, UnconfirmedReason, poll_payment};
pub use stripe::{PixRequest, StripeClient};

/// Errors from the payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Connection, timeout or body read failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Rate limited by the provider.
    #[error("rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Response body did not match the expected shape.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A created PIX payment carried no QR payload.
    #[error("payment {0} has no PIX code")]
    MissingQrCode(String),

    /// Amount cannot be expressed in centavos.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Response parsed but carried unusable values.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, provider 5xx responses and rate limiting are
    /// transient; everything else is a definitive answer.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            Self::Parse(_)
            | Self::MissingQrCode(_)
            | Self::InvalidAmount(_)
            | Self::InvalidResponse(_) => false,
        }
    }
}

/// Anything that can report a payment's current status.
pub trait PaymentStatusSource: Send + Sync {
    /// Query the provider once.
    fn payment_status(
        &self,
        payment_id: &PaymentId,
    ) -> impl Future<Output = Result<PaymentIntent, PaymentError>> + Send;
}

impl<T: PaymentStatusSource> PaymentStatusSource for std::sync::Arc<T> {
    fn payment_status(
        &self,
        payment_id: &PaymentId,
    ) -> impl Future<Output = Result<PaymentIntent, PaymentError>> + Send {
        (**self).payment_status(payment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PaymentError::RateLimited(2).is_transient());
        assert!(
            PaymentError::Status {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !PaymentError::Status {
                status: 404,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!PaymentError::MissingQrCode("pi_1".to_owned()).is_transient());
    }
}
