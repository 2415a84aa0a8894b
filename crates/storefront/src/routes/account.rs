//! Account route handlers.
//!
//! These routes require authentication.

use askama::Template;
use askama_web::WebTemplate;
use axum::extract::State;
use tracing::instrument;

use loja_core::OrderStatus;

use crate::db::OrderRepository;
use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::models::{CurrentUser, Order};
use crate::routes::checkout::PixParams;
use crate::state::AppState;

/// Order line display data for templates.
#[derive(Clone)]
pub struct OrderLineView {
    pub title: String,
    pub quantity: u8,
    pub line_price: String,
}

/// Order display data for templates.
#[derive(Clone)]
pub struct OrderView {
    pub number: String,
    pub placed_on: String,
    pub status: OrderStatus,
    pub status_label: &'static str,
    pub total: String,
    pub lines: Vec<OrderLineView>,
    /// Link back to the PIX page while the order is still payable.
    pub resume_url: Option<String>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        let resume_url = match (&order.payment_id, &order.pix_qr) {
            (Some(payment_id), Some(qr)) if order.status.is_open() => Some(
                PixParams {
                    order_id: order.id,
                    payment_id: payment_id.clone(),
                    qr: qr.clone(),
                }
                .page_url(),
            ),
            _ => None,
        };

        Self {
            number: format!("#{}", order.id),
            placed_on: order.created_at.format("%d/%m/%Y").to_string(),
            status: order.status,
            status_label: order.status.label(),
            total: order.total.to_string(),
            lines: order
                .lines
                .iter()
                .map(|line| OrderLineView {
                    title: line.title.clone(),
                    quantity: line.quantity,
                    line_price: line.unit_price.times(line.quantity).to_string(),
                })
                .collect(),
            resume_url,
        }
    }
}

/// Account overview page template.
#[derive(Template, WebTemplate)]
#[template(path = "account/index.html")]
pub struct AccountIndexTemplate {
    pub email: String,
    pub orders: Vec<OrderView>,
    pub current_user: Option<CurrentUser>,
}

/// Display the account page with order history.
#[instrument(skip(state, current_user), fields(user_id = %current_user.id))]
pub async fn index(
    State(state): State<AppState>,
    RequireAuth(current_user): RequireAuth,
) -> Result<AccountIndexTemplate> {
    let orders = OrderRepository::new(state.pool())
        .list_for_user(current_user.id)
        .await?;

    Ok(AccountIndexTemplate {
        email: current_user.email.to_string(),
        orders: orders.iter().map(OrderView::from).collect(),
        current_user: Some(current_user),
    })
}
