//! Guest cart held in the server-side session.

use tower_sessions::Session;

use super::CartError;
use super::reconcile::GuestCartStore;
use crate::models::{GuestCart, session_keys};

/// The visitor's guest cart, read from and written to their session.
#[derive(Clone)]
pub struct SessionGuestCart {
    session: Session,
}

impl SessionGuestCart {
    #[must_use]
    pub const fn new(session: Session) -> Self {
        Self { session }
    }
}

impl GuestCartStore for SessionGuestCart {
    async fn load(&self) -> Result<GuestCart, CartError> {
        Ok(self
            .session
            .get::<GuestCart>(session_keys::GUEST_CART)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, cart: &GuestCart) -> Result<(), CartError> {
        if cart.is_empty() {
            return self.clear().await;
        }
        self.session.insert(session_keys::GUEST_CART, cart).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CartError> {
        self.session
            .remove::<GuestCart>(session_keys::GUEST_CART)
            .await?;
        Ok(())
    }
}
