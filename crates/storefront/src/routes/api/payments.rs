//! Payment status API.
//!
//! One-shot alternative to the PIX events stream, for clients that poll on
//! their own. Each call queries the provider once and settles the order if
//! the payment reached a terminal status.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use loja_core::{OrderId, OrderStatus, PaymentId, PaymentStatus};

use crate::db::OrderRepository;
use crate::db::orders::Settlement;
use crate::error::{AppError, Result};
use crate::middleware::RequireAuth;
use crate::services::checkout::CheckoutService;
use crate::state::AppState;

/// Response body of `GET /api/payments/{payment_id}/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub status: PaymentStatus,
    pub order_status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Current status of a payment issued for one of the caller's orders.
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn status(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>> {
    let not_found = || AppError::NotFound("payment".to_string());

    let payment_id = PaymentId::parse(&payment_id).map_err(|_| not_found())?;
    let order = OrderRepository::new(state.pool())
        .get_by_payment_id(&payment_id)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(not_found)?;

    let intent = state.payments().retrieve(&payment_id).await?;

    let mut order_status = order.status;
    if let Some(settled) = intent.status.settled_order_status() {
        let settlement = CheckoutService::new(state.pool(), state.payments())
            .settle(order.id, &payment_id, intent.status)
            .await?;
        if matches!(settlement, Settlement::Applied { .. }) {
            order_status = settled;
        }
    }

    Ok(Json(PaymentStatusResponse {
        payment_id,
        order_id: order.id,
        status: intent.status,
        order_status,
        expires_at: intent.expires_at.or(order.pix_expires_at),
    }))
}
