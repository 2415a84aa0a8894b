//! Cart route handlers.
//!
//! Guests edit the session cart; logged-in users edit their persisted cart.
//! Forms post and redirect back to `/cart`, except `add` from an HTMX request,
//! which answers with the count badge and a `cart-updated` trigger.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::State,
    http::HeaderMap,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use loja_core::{Price, ProductId};

use crate::error::Result;
use crate::middleware::OptionalAuth;
use crate::models::{CartLine, CurrentUser};
use crate::services::cart::CartService;
use crate::state::AppState;

/// Cart line display data for templates.
#[derive(Clone)]
pub struct CartItemView {
    pub product_id: ProductId,
    pub handle: String,
    pub title: String,
    pub quantity: u8,
    pub price: String,
    pub line_price: String,
    pub available: bool,
}

impl From<&CartLine> for CartItemView {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id,
            handle: line.handle.clone(),
            title: line.title.clone(),
            quantity: line.quantity.get(),
            price: line.unit_price.to_string(),
            line_price: line.line_total().to_string(),
            available: line.available,
        }
    }
}

/// Cart display data for templates.
#[derive(Clone)]
pub struct CartView {
    pub items: Vec<CartItemView>,
    pub subtotal: String,
    pub item_count: u32,
    /// Some line can no longer be bought and will be left out of checkout.
    pub has_unavailable: bool,
}

impl CartView {
    fn from_lines(lines: &[CartLine]) -> Self {
        let subtotal = lines
            .iter()
            .filter(|l| l.available)
            .fold(Price::zero(), |acc, l| acc.plus(&l.line_total()));

        Self {
            items: lines.iter().map(CartItemView::from).collect(),
            subtotal: subtotal.to_string(),
            item_count: lines.iter().map(|l| u32::from(l.quantity.get())).sum(),
            has_unavailable: lines.iter().any(|l| !l.available),
        }
    }
}

/// Add to cart form data.
#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub product_id: ProductId,
    pub quantity: Option<i64>,
}

/// Update cart form data.
#[derive(Debug, Deserialize)]
pub struct UpdateCartForm {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Remove from cart form data.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartForm {
    pub product_id: ProductId,
}

/// Cart page template.
#[derive(Template, WebTemplate)]
#[template(path = "cart/show.html")]
pub struct CartShowTemplate {
    pub cart: CartView,
    pub current_user: Option<CurrentUser>,
}

/// Cart count badge fragment template (for HTMX).
#[derive(Template, WebTemplate)]
#[template(path = "partials/cart_count.html")]
pub struct CartCountTemplate {
    pub count: u32,
}

fn cart_service<'a>(
    state: &'a AppState,
    session: Session,
    user: Option<&CurrentUser>,
) -> CartService<'a> {
    CartService::new(state.pool(), session, user.map(|u| u.id))
}

/// Display cart page.
#[instrument(skip(state, session, current_user))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(current_user): OptionalAuth,
) -> Result<CartShowTemplate> {
    let lines = cart_service(&state, session, current_user.as_ref())
        .lines()
        .await?;

    Ok(CartShowTemplate {
        cart: CartView::from_lines(&lines),
        current_user,
    })
}

/// Add units of a product to the cart.
#[instrument(skip(state, session, current_user, headers))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(current_user): OptionalAuth,
    headers: HeaderMap,
    Form(form): Form<AddToCartForm>,
) -> Result<Response> {
    let cart = cart_service(&state, session, current_user.as_ref());
    cart.add(form.product_id, form.quantity.unwrap_or(1)).await?;

    if headers.contains_key("HX-Request") {
        let count = cart.item_count().await?;
        return Ok((
            AppendHeaders([("HX-Trigger", "cart-updated")]),
            CartCountTemplate { count },
        )
            .into_response());
    }

    Ok(Redirect::to("/cart").into_response())
}

/// Overwrite a line's quantity; zero removes it.
#[instrument(skip(state, session, current_user))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(current_user): OptionalAuth,
    Form(form): Form<UpdateCartForm>,
) -> Result<Redirect> {
    cart_service(&state, session, current_user.as_ref())
        .update(form.product_id, form.quantity)
        .await?;
    Ok(Redirect::to("/cart"))
}

/// Remove a line.
#[instrument(skip(state, session, current_user))]
pub async fn remove(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(current_user): OptionalAuth,
    Form(form): Form<RemoveFromCartForm>,
) -> Result<Redirect> {
    cart_service(&state, session, current_user.as_ref())
        .remove(form.product_id)
        .await?;
    Ok(Redirect::to("/cart"))
}

/// Cart count badge (HTMX fragment).
pub async fn count(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(current_user): OptionalAuth,
) -> CartCountTemplate {
    let count = cart_service(&state, session, current_user.as_ref())
        .item_count()
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to count cart items");
            0
        });
    CartCountTemplate { count }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use loja_core::Quantity;

    use super::*;

    fn line(id: i32, cents: i64, quantity: i64, available: bool) -> CartLine {
        CartLine {
            product_id: ProductId::new(id),
            handle: format!("produto-{id}"),
            title: format!("Produto {id}"),
            unit_price: Price::from_cents(cents),
            quantity: Quantity::for_addition(quantity).unwrap(),
            available,
        }
    }

    #[test]
    fn test_cart_view_totals_skip_unavailable_lines() {
        let view = CartView::from_lines(&[line(1, 1_000, 2, true), line(2, 500, 1, false)]);

        assert_eq!(view.items.len(), 2);
        assert_eq!(view.item_count, 3);
        assert_eq!(view.subtotal, "R$ 20,00");
        assert!(view.has_unavailable);
        assert_eq!(view.items[0].line_price, "R$ 20,00");
    }

    #[test]
    fn test_empty_cart_view() {
        let view = CartView::from_lines(&[]);
        assert!(view.items.is_empty());
        assert_eq!(view.subtotal, "R$ 0,00");
        assert!(!view.has_unavailable);
    }
}
