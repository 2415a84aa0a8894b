//! Merge the guest cart into the persisted cart once a user is logged in.
//!
//! Runs on every request. It only does work when the session holds both a
//! logged-in user and guest entries, so the common path is two reads of the
//! already-loaded session. Reconciliation is idempotent, which makes running
//! it on every request (and again from the login handler) harmless.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;

use loja_core::UserId;

use crate::db::CartRepository;
use crate::models::{CurrentUser, GuestCart, session_keys};
use crate::services::cart::SessionGuestCart;
use crate::state::AppState;

/// Middleware: reconcile before handling the request.
///
/// Failures are logged and never fail the request; unmerged entries stay in
/// the session for the next trigger.
pub async fn guest_cart_sync_middleware(
    State(state): State<AppState>,
    session: Session,
    request: Request,
    next: Next,
) -> Response {
    let user = session
        .get::<CurrentUser>(session_keys::CURRENT_USER)
        .await
        .ok()
        .flatten();

    if let Some(user) = user {
        let has_guest_entries = session
            .get::<GuestCart>(session_keys::GUEST_CART)
            .await
            .ok()
            .flatten()
            .is_some_and(|cart| !cart.is_empty());

        if has_guest_entries {
            reconcile_guest_cart(&state, &session, user.id).await;
        }
    }

    next.run(request).await
}

/// Reconcile the session's guest cart into `user_id`'s cart, logging failures.
pub async fn reconcile_guest_cart(state: &AppState, session: &Session, user_id: UserId) {
    let cart = CartRepository::new(state.pool());
    let guest = SessionGuestCart::new(session.clone());

    match state.reconciler().reconcile(user_id, &cart, &guest).await {
        Ok(report) if !report.is_complete() && !report.skipped => {
            tracing::warn!(
                user_id = %user_id,
                failed = report.failed.len(),
                "Guest cart partially merged, will retry"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Guest cart reconciliation failed");
        }
    }
}
