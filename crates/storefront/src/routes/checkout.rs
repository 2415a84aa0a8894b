//! Checkout and PIX confirmation.
//!
//! Flow:
//! 1. `POST /checkout` creates a pending order from the persisted cart and a
//!    PIX payment, then redirects to `/checkout/pix?orderId=..&paymentId=..&qr=..`
//! 2. The PIX page shows the code and opens an `EventSource` on
//!    `/checkout/pix/{order_id}/events?paymentId=..`
//! 3. The events stream polls the provider (bounded, see
//!    [`confirm_payment`]) and settles the order on the first terminal status
//!
//! Closing the page closes the `EventSource`, which drops the stream and with
//! it any pending poll.

use askama::Template;
use askama_web::WebTemplate;
use async_stream::stream;
use axum::{
    extract::{Path, Query, State},
    response::{
        IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::instrument;

use loja_core::{OrderId, OrderStatus, PaymentId};

use crate::db::OrderRepository;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::{OptionalAuth, RequireAuth};
use crate::models::CurrentUser;
use crate::services::checkout::{CheckoutError, CheckoutService, PixCheckout, confirm_payment};
use crate::services::payments::{PollEvent, PollOutcome};
use crate::state::AppState;

// =============================================================================
// Query Types
// =============================================================================

/// Raw query of the PIX page. Every field is required; see [`PixParams`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixQuery {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub qr: Option<String>,
}

/// Validated PIX page parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixParams {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub qr: String,
}

impl PixParams {
    /// Validate the page query. `None` if any field is missing, blank or
    /// malformed. The QR payload is kept exactly as received.
    #[must_use]
    pub fn from_query(query: &PixQuery) -> Option<Self> {
        let order_id = query.order_id.as_deref()?.trim().parse::<OrderId>().ok()?;
        let payment_id = PaymentId::parse(query.payment_id.as_deref()?).ok()?;
        let qr = query.qr.as_deref()?;
        if qr.trim().is_empty() {
            return None;
        }
        Some(Self {
            order_id,
            payment_id,
            qr: qr.to_owned(),
        })
    }

    /// URL of the PIX page for these parameters.
    #[must_use]
    pub fn page_url(&self) -> String {
        format!(
            "/checkout/pix?orderId={}&paymentId={}&qr={}",
            self.order_id,
            urlencoding::encode(self.payment_id.as_str()),
            urlencoding::encode(&self.qr)
        )
    }

    /// URL of the confirmation event stream.
    #[must_use]
    pub fn events_url(&self) -> String {
        format!(
            "/checkout/pix/{}/events?paymentId={}",
            self.order_id,
            urlencoding::encode(self.payment_id.as_str())
        )
    }
}

impl From<PixCheckout> for PixParams {
    fn from(checkout: PixCheckout) -> Self {
        Self {
            order_id: checkout.order_id,
            payment_id: checkout.payment_id,
            qr: checkout.qr,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub payment_id: String,
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Template, WebTemplate)]
#[template(path = "checkout/pix.html")]
pub struct PixTemplate {
    pub order_id: OrderId,
    pub qr: String,
    pub events_url: String,
    pub current_user: Option<CurrentUser>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create the order and its PIX payment, then send the buyer to the PIX page.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn start(State(state): State<AppState>, RequireAuth(user): RequireAuth) -> Result<Response> {
    let checkout = CheckoutService::new(state.pool(), state.payments());

    match checkout.start_pix(&user).await {
        Ok(pix) => {
            add_breadcrumb(
                "checkout",
                "PIX payment issued",
                &[("order_id", pix.order_id.to_string())],
            );
            let params = PixParams::from(pix);
            Ok(Redirect::to(&params.page_url()).into_response())
        }
        Err(CheckoutError::EmptyCart) => Ok(Redirect::to("/cart").into_response()),
        Err(e) => Err(e.into()),
    }
}

/// The PIX page.
///
/// Requires `orderId`, `paymentId` and `qr`; if any is missing or malformed
/// the visitor is sent to `/` without an error.
pub async fn pix_page(
    OptionalAuth(current_user): OptionalAuth,
    Query(query): Query<PixQuery>,
) -> Response {
    let Some(params) = PixParams::from_query(&query) else {
        return Redirect::to("/").into_response();
    };

    PixTemplate {
        order_id: params.order_id,
        events_url: params.events_url(),
        qr: params.qr,
        current_user,
    }
    .into_response()
}

/// Server-sent events reporting the payment's progress.
///
/// Emits `poll` events whose JSON data is a [`PollEvent`]; the last one is
/// always `{"state":"finished",...}`. An order that is already settled gets
/// its outcome immediately, without asking the provider.
#[instrument(skip(state, user, query), fields(user_id = %user.id, order_id = %order_id))]
pub async fn pix_events(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(order_id): Path<OrderId>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let not_found = || AppError::NotFound("order".to_string());

    let payment_id = PaymentId::parse(&query.payment_id)
        .map_err(|_| AppError::BadRequest("invalid paymentId".to_string()))?;
    if !order_id.is_well_formed() {
        return Err(not_found());
    }

    let order = OrderRepository::new(state.pool())
        .get(order_id)
        .await?
        .filter(|o| o.user_id == user.id && o.is_paid_with(&payment_id))
        .ok_or_else(not_found)?;

    let settled = settled_outcome(order.status);

    let events = stream! {
        if let Some(outcome) = settled {
            yield poll_event(&PollEvent::Finished(outcome));
            return;
        }

        let orders = OrderRepository::new(state.pool());
        let mut events = Box::pin(confirm_payment(
            state.payments().clone(),
            &orders,
            order_id,
            payment_id,
            state.config().polling,
        ));

        while let Some(event) = events.next().await {
            yield poll_event(&event);
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Outcome to report for an order that no longer needs polling.
const fn settled_outcome(status: OrderStatus) -> Option<PollOutcome> {
    match status {
        OrderStatus::Pending => None,
        OrderStatus::Paid => Some(PollOutcome::Approved),
        OrderStatus::Failed => Some(PollOutcome::Rejected),
        OrderStatus::Expired => Some(PollOutcome::Expired),
    }
}

fn poll_event(event: &PollEvent) -> std::result::Result<Event, axum::Error> {
    Event::default().event("poll").json_data(event)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::{Router, body::Body, http::Request, http::StatusCode, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn query(order_id: Option<&str>, payment_id: Option<&str>, qr: Option<&str>) -> PixQuery {
        PixQuery {
            order_id: order_id.map(String::from),
            payment_id: payment_id.map(String::from),
            qr: qr.map(String::from),
        }
    }

    async fn get_page(uri: &str) -> axum::response::Response {
        let app = Router::new().route("/checkout/pix", get(pix_page));
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn test_params_require_every_field() {
        let full = query(Some("12"), Some("pi_3Qabc"), Some("000201pix"));
        let params = PixParams::from_query(&full).unwrap();
        assert_eq!(params.order_id, OrderId::new(12));
        assert_eq!(params.payment_id.as_str(), "pi_3Qabc");
        assert_eq!(params.qr, "000201pix");

        assert!(PixParams::from_query(&query(None, Some("pi_1"), Some("qr"))).is_none());
        assert!(PixParams::from_query(&query(Some("12"), None, Some("qr"))).is_none());
        assert!(PixParams::from_query(&query(Some("12"), Some("pi_1"), None)).is_none());
        assert!(PixParams::from_query(&query(Some("12"), Some("pi_1"), Some("  "))).is_none());
        assert!(PixParams::from_query(&query(Some("abc"), Some("pi_1"), Some("qr"))).is_none());
        assert!(PixParams::from_query(&query(Some("0"), Some("pi_1"), Some("qr"))).is_none());
    }

    #[test]
    fn test_qr_payload_is_kept_verbatim() {
        let params =
            PixParams::from_query(&query(Some("12"), Some("pi_1"), Some(" 000201pix\n"))).unwrap();
        assert_eq!(params.qr, " 000201pix\n");

        let url = params.page_url();
        let encoded = url.split("qr=").nth(1).unwrap();
        assert_eq!(urlencoding::decode(encoded).unwrap(), " 000201pix\n");
    }

    #[test]
    fn test_page_url_round_trips_qr() {
        let params = PixParams {
            order_id: OrderId::new(5),
            payment_id: PaymentId::parse("pi_5").unwrap(),
            qr: "00020126580014br.gov.bcb.pix0136 a+b&c=d".to_string(),
        };
        let url = params.page_url();
        assert!(url.starts_with("/checkout/pix?orderId=5&paymentId=pi_5&qr="));
        assert!(!url.contains(' '));
        assert!(!url.contains("&c=d"));
        assert_eq!(params.events_url(), "/checkout/pix/5/events?paymentId=pi_5");
    }

    #[tokio::test]
    async fn test_page_renders_with_all_params() {
        let response = get_page("/checkout/pix?orderId=7&paymentId=pi_7&qr=000201%2Bpix").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_page_redirects_home_when_a_param_is_missing() {
        for uri in [
            "/checkout/pix",
            "/checkout/pix?paymentId=pi_7&qr=abc",
            "/checkout/pix?orderId=7&qr=abc",
            "/checkout/pix?orderId=7&paymentId=pi_7",
            "/checkout/pix?orderId=7&paymentId=pi_7&qr=",
        ] {
            let response = get_page(uri).await;
            assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
            assert_eq!(response.headers()["location"], "/", "{uri}");
        }
    }

    #[test]
    fn test_settled_orders_map_to_outcomes() {
        assert_eq!(settled_outcome(OrderStatus::Pending), None);
        assert_eq!(
            settled_outcome(OrderStatus::Paid),
            Some(PollOutcome::Approved)
        );
        assert_eq!(
            settled_outcome(OrderStatus::Failed),
            Some(PollOutcome::Rejected)
        );
        assert_eq!(
            settled_outcome(OrderStatus::Expired),
            Some(PollOutcome::Expired)
        );
    }
}
