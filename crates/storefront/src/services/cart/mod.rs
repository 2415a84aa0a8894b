//! Cart operations for guests (session) and logged-in users (database).
//!
//! Guests keep their cart in the session under `guest_cart`. Once a user is
//! logged in, [`CartReconciler`] merges that cart into the persisted one and
//! every later cart action goes to the database.

mod guest;
mod reconcile;

use std::collections::HashMap;

use sqlx::PgPool;
use thiserror::Error;
use tower_sessions::Session;
use tracing::instrument;

use loja_core::{ProductId, Quantity, QuantityError, UserId};

use crate::db::{CartRepository, ProductRepository, RepositoryError};
use crate::models::CartLine;

pub use crate::db::cart::MergeOutcome;
pub use guest::SessionGuestCart;
pub use reconcile::{CartReconciler, CartStore, GuestCartStore, ReconcileReport};

/// Errors from cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Session store failure.
    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    /// Quantity outside the accepted range.
    #[error("invalid quantity: {0}")]
    Quantity(#[from] QuantityError),

    /// Product does not exist or is no longer sold.
    #[error("product not found")]
    ProductNotFound,
}

/// Cart actions for the current visitor.
///
/// `user` selects the persisted cart; without it the session cart is used.
pub struct CartService<'a> {
    pool: &'a PgPool,
    guest: SessionGuestCart,
    user: Option<UserId>,
}

impl<'a> CartService<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool, session: Session, user: Option<UserId>) -> Self {
        Self {
            pool,
            guest: SessionGuestCart::new(session),
            user,
        }
    }

    /// Lines with product details, in the order they were added.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the session or database cannot be read.
    pub async fn lines(&self) -> Result<Vec<CartLine>, CartError> {
        if let Some(user_id) = self.user {
            return Ok(CartRepository::new(self.pool).lines(user_id).await?);
        }

        let cart = self.guest.load().await?;
        if cart.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<ProductId> = cart.entries().iter().map(|e| e.product_id).collect();
        let products: HashMap<ProductId, _> = ProductRepository::new(self.pool)
            .get_many(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(cart
            .entries()
            .iter()
            .filter_map(|entry| {
                let product = products.get(&entry.product_id)?;
                Some(CartLine {
                    product_id: product.id,
                    handle: product.handle.clone(),
                    title: product.title.clone(),
                    unit_price: product.price,
                    quantity: entry.quantity,
                    available: product.active,
                })
            })
            .collect())
    }

    /// Total units in the cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the session or database cannot be read.
    pub async fn item_count(&self) -> Result<u32, CartError> {
        match self.user {
            Some(user_id) => Ok(CartRepository::new(self.pool).item_count(user_id).await?),
            None => Ok(self.guest.load().await?.item_count()),
        }
    }

    /// Add `quantity` (1..=99) units, summing with the existing line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Quantity` if the quantity is out of range.
    /// Returns `CartError::ProductNotFound` if the product is not sold.
    #[instrument(skip(self))]
    pub async fn add(&self, product_id: ProductId, quantity: i64) -> Result<(), CartError> {
        let quantity = Quantity::for_addition(quantity)?;

        if let Some(user_id) = self.user {
            return CartRepository::new(self.pool)
                .add(user_id, product_id, quantity)
                .await?
                .map(|_| ())
                .ok_or(CartError::ProductNotFound);
        }

        self.ensure_sold(product_id).await?;
        let mut cart = self.guest.load().await?;
        cart.add(product_id, quantity);
        self.guest.save(&cart).await
    }

    /// Overwrite a line's quantity (0..=99); zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Quantity` if the quantity is out of range.
    /// Returns `CartError::ProductNotFound` if the product is not sold.
    #[instrument(skip(self))]
    pub async fn update(&self, product_id: ProductId, quantity: i64) -> Result<(), CartError> {
        let quantity = Quantity::for_update(quantity)?;

        if let Some(user_id) = self.user {
            let written = CartRepository::new(self.pool)
                .set_quantity(user_id, product_id, quantity)
                .await?;
            return if written {
                Ok(())
            } else {
                Err(CartError::ProductNotFound)
            };
        }

        if !quantity.is_zero() {
            self.ensure_sold(product_id).await?;
        }
        let mut cart = self.guest.load().await?;
        cart.set(product_id, quantity);
        self.guest.save(&cart).await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the session or database write fails.
    #[instrument(skip(self))]
    pub async fn remove(&self, product_id: ProductId) -> Result<(), CartError> {
        if let Some(user_id) = self.user {
            return Ok(CartRepository::new(self.pool)
                .remove(user_id, product_id)
                .await?);
        }

        let mut cart = self.guest.load().await?;
        cart.remove(product_id);
        self.guest.save(&cart).await
    }

    async fn ensure_sold(&self, product_id: ProductId) -> Result<(), CartError> {
        let found = ProductRepository::new(self.pool)
            .get_many(&[product_id])
            .await?
            .into_iter()
            .any(|p| p.active);
        if found {
            Ok(())
        } else {
            Err(CartError::ProductNotFound)
        }
    }
}
