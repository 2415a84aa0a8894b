//! Stripe `PaymentIntents` client for PIX.
//!
//! Only two calls are needed: create-and-confirm a PIX intent, and retrieve
//! an intent to read its status. Both go through [`StripeClient::execute`],
//! which maps rate limiting and error bodies into [`PaymentError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use loja_core::{Email, OrderId, PaymentId, PaymentStatus, Price};

use super::{PaymentError, PaymentStatusSource};
use crate::config::PaymentConfig;
use crate::models::PaymentIntent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What we ask the provider to charge.
#[derive(Debug, Clone)]
pub struct PixRequest {
    pub order_id: OrderId,
    pub amount: Price,
    pub email: Email,
}

/// Client for the Stripe REST API.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    api_base: String,
    secret_key: SecretString,
    pix_expires_after: Duration,
}

impl StripeClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Http` if the HTTP client cannot be built.
    pub fn new(config: &PaymentConfig) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(StripeClientInner {
                client,
                api_base: config.api_base.clone(),
                secret_key: config.secret_key.clone(),
                pix_expires_after: config.pix_expires_after,
            }),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.inner
            .client
            .request(method, format!("{}{path}", self.inner.api_base))
            .bearer_auth(self.inner.secret_key.expose_secret())
    }

    /// Send a request and decode the JSON body.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, PaymentError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(PaymentError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .map(|b| b.error.message.unwrap_or(b.error.kind))
                .unwrap_or_else(|_| body.chars().take(200).collect());
            tracing::warn!(status = %status, message = %message, "Stripe returned non-success status");
            return Err(PaymentError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse Stripe response"
            );
            PaymentError::Parse(e)
        })
    }

    /// Create and confirm a PIX payment for an order.
    ///
    /// The order ID doubles as the idempotency key, so retrying a checkout
    /// never creates a second charge for the same order.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::InvalidAmount` if the amount is not representable.
    /// Returns `PaymentError::MissingQrCode` if Stripe returns no PIX code.
    /// Returns other `PaymentError`s if the request fails.
    #[instrument(skip(self), fields(order_id = %request.order_id))]
    pub async fn create_pix_payment(
        &self,
        request: &PixRequest,
    ) -> Result<PaymentIntent, PaymentError> {
        let cents = request
            .amount
            .to_cents()
            .filter(|c| *c > 0)
            .ok_or_else(|| PaymentError::InvalidAmount(request.amount.to_string()))?;

        let form = [
            ("amount", cents.to_string()),
            ("currency", request.amount.currency.code().to_ascii_lowercase()),
            ("confirm", "true".to_owned()),
            ("payment_method_types[]", "pix".to_owned()),
            ("payment_method_data[type]", "pix".to_owned()),
            (
                "payment_method_data[billing_details][email]",
                request.email.as_str().to_owned(),
            ),
            (
                "payment_method_options[pix][expires_after_seconds]",
                self.inner.pix_expires_after.as_secs().to_string(),
            ),
            ("receipt_email", request.email.as_str().to_owned()),
            ("metadata[order_id]", request.order_id.to_string()),
        ];

        let intent: StripeIntent = self
            .execute(
                self.request(Method::POST, "/v1/payment_intents")
                    .header("Idempotency-Key", format!("order-{}-pix", request.order_id))
                    .form(&form),
            )
            .await?;

        let intent = intent.into_payment_intent(Utc::now())?;
        if intent.qr.is_none() {
            return Err(PaymentError::MissingQrCode(intent.id.to_string()));
        }

        tracing::info!(payment_id = %intent.id, "PIX payment created");
        Ok(intent)
    }

    /// Retrieve a payment and classify its status.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError` if the request fails or the body is malformed.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn retrieve(&self, payment_id: &PaymentId) -> Result<PaymentIntent, PaymentError> {
        let path = format!(
            "/v1/payment_intents/{}",
            urlencoding::encode(payment_id.as_str())
        );
        let intent: StripeIntent = self.execute(self.request(Method::GET, &path)).await?;
        intent.into_payment_intent(Utc::now())
    }
}

impl PaymentStatusSource for StripeClient {
    async fn payment_status(&self, payment_id: &PaymentId) -> Result<PaymentIntent, PaymentError> {
        self.retrieve(payment_id).await
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    next_action: Option<NextAction>,
    cancellation_reason: Option<String>,
    last_payment_error: Option<serde_json::Value>,
    payment_method_options: Option<MethodOptions>,
}

#[derive(Debug, Deserialize)]
struct NextAction {
    pix_display_qr_code: Option<PixDisplayQrCode>,
}

#[derive(Debug, Deserialize)]
struct PixDisplayQrCode {
    data: String,
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MethodOptions {
    pix: Option<PixOptions>,
}

#[derive(Debug, Deserialize)]
struct PixOptions {
    expires_at: Option<i64>,
}

impl StripeIntent {
    fn pix_code(&self) -> Option<&PixDisplayQrCode> {
        self.next_action.as_ref()?.pix_display_qr_code.as_ref()
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let timestamp = self.pix_code().and_then(|c| c.expires_at).or_else(|| {
            self.payment_method_options
                .as_ref()?
                .pix
                .as_ref()?
                .expires_at
        })?;
        DateTime::from_timestamp(timestamp, 0)
    }

    fn classify(&self, now: DateTime<Utc>) -> PaymentStatus {
        let past_expiry = self.expires_at().is_some_and(|at| at <= now);
        match self.status.as_str() {
            "succeeded" => PaymentStatus::Approved,
            "canceled" => match self.cancellation_reason.as_deref() {
                Some("abandoned" | "automatic") => PaymentStatus::Expired,
                _ => PaymentStatus::Rejected,
            },
            "requires_payment_method" if past_expiry => PaymentStatus::Expired,
            "requires_payment_method" => PaymentStatus::Rejected,
            "requires_action" if past_expiry => PaymentStatus::Expired,
            _ => PaymentStatus::Pending,
        }
    }

    fn into_payment_intent(self, now: DateTime<Utc>) -> Result<PaymentIntent, PaymentError> {
        let id = PaymentId::parse(&self.id)
            .map_err(|e| PaymentError::InvalidResponse(format!("payment id: {e}")))?;
        let status = self.classify(now);
        let expires_at = self.expires_at();
        let qr = self.pix_code().map(|c| c.data.clone());
        let order_id = self.metadata.get("order_id").and_then(|v| v.parse().ok());

        if status == PaymentStatus::Rejected
            && let Some(error) = &self.last_payment_error
        {
            tracing::info!(payment_id = %self.id, error = %error, "Payment rejected by provider");
        }

        Ok(PaymentIntent {
            id,
            order_id,
            status,
            qr,
            expires_at,
            provider_status: self.status,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn intent(json: &str) -> StripeIntent {
        serde_json::from_str(json).unwrap()
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    const AWAITING: &str = r#"{
        "id": "pi_3QabcXYZ",
        "status": "requires_action",
        "metadata": {"order_id": "42"},
        "next_action": {
            "type": "pix_display_qr_code",
            "pix_display_qr_code": {
                "data": "00020101021226880014br.gov.bcb.pix",
                "expires_at": 1700000000,
                "image_url_png": "https://qr.stripe.com/test.png"
            }
        },
        "cancellation_reason": null,
        "last_payment_error": null
    }"#;

    #[test]
    fn test_awaiting_payment_is_pending_with_qr() {
        let pi = intent(AWAITING).into_payment_intent(at(1_699_999_000)).unwrap();

        assert_eq!(pi.status, PaymentStatus::Pending);
        assert_eq!(pi.id.as_str(), "pi_3QabcXYZ");
        assert_eq!(pi.order_id, Some(OrderId::new(42)));
        assert_eq!(pi.qr.as_deref(), Some("00020101021226880014br.gov.bcb.pix"));
        assert_eq!(pi.expires_at, Some(at(1_700_000_000)));
        assert_eq!(pi.provider_status, "requires_action");
    }

    #[test]
    fn test_awaiting_past_expiry_is_expired() {
        let pi = intent(AWAITING).into_payment_intent(at(1_700_000_001)).unwrap();
        assert_eq!(pi.status, PaymentStatus::Expired);
    }

    #[test]
    fn test_succeeded_is_approved() {
        let pi = intent(r#"{"id": "pi_1", "status": "succeeded", "next_action": null}"#);
        assert_eq!(pi.classify(at(0)), PaymentStatus::Approved);
    }

    #[test]
    fn test_processing_is_pending() {
        let pi = intent(r#"{"id": "pi_1", "status": "processing"}"#);
        assert_eq!(pi.classify(at(0)), PaymentStatus::Pending);
    }

    #[test]
    fn test_cancellation_reasons() {
        let abandoned = intent(
            r#"{"id": "pi_1", "status": "canceled", "cancellation_reason": "abandoned"}"#,
        );
        assert_eq!(abandoned.classify(at(0)), PaymentStatus::Expired);

        let fraud = intent(
            r#"{"id": "pi_1", "status": "canceled", "cancellation_reason": "fraudulent"}"#,
        );
        assert_eq!(fraud.classify(at(0)), PaymentStatus::Rejected);
    }

    #[test]
    fn test_requires_payment_method_uses_option_expiry() {
        let json = r#"{
            "id": "pi_1",
            "status": "requires_payment_method",
            "payment_method_options": {"pix": {"expires_at": 1700000000}},
            "last_payment_error": {"code": "payment_intent_payment_attempt_expired"}
        }"#;
        assert_eq!(intent(json).classify(at(1_700_000_500)), PaymentStatus::Expired);
        assert_eq!(intent(json).classify(at(1_699_000_000)), PaymentStatus::Rejected);
    }

    #[test]
    fn test_error_body_parses() {
        let body: StripeErrorBody = serde_json::from_str(
            r#"{"error": {"type": "invalid_request_error", "message": "No such payment_intent"}}"#,
        )
        .unwrap();
        assert_eq!(body.error.message.as_deref(), Some("No such payment_intent"));
        assert_eq!(body.error.kind, "invalid_request_error");
    }

    #[test]
    fn test_malformed_id_is_invalid_response() {
        let pi = intent(r#"{"id": "pi 1/2", "status": "succeeded"}"#);
        assert!(matches!(
            pi.into_payment_intent(at(0)),
            Err(PaymentError::InvalidResponse(_))
        ));
    }
}
