//! Cart types: the guest cart held in the session and the persisted cart.

use serde::{Deserialize, Serialize};

use loja_core::{GuestCartToken, Price, ProductId, Quantity};

/// One line of a guest cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCartEntry {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// Cart held in the session of a visitor who is not logged in.
///
/// Entries are unique per product; writing a product's quantity replaces the
/// previous value. The token is minted with the first entry and identifies
/// this cart in the merge ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCart {
    token: Option<GuestCartToken>,
    entries: Vec<GuestCartEntry>,
}

impl GuestCart {
    /// Build a cart from raw entries, keeping the last write per product.
    #[must_use]
    pub fn from_entries(
        token: GuestCartToken,
        entries: impl IntoIterator<Item = GuestCartEntry>,
    ) -> Self {
        let mut cart = Self {
            token: Some(token),
            entries: Vec::new(),
        };
        for entry in entries {
            cart.set(entry.product_id, entry.quantity);
        }
        cart
    }

    /// Token of this cart, if it ever held anything.
    #[must_use]
    pub const fn token(&self) -> Option<GuestCartToken> {
        self.token
    }

    /// Token of this cart, minting one if it has none yet.
    pub fn ensure_token(&mut self) -> GuestCartToken {
        *self.token.get_or_insert_with(GuestCartToken::generate)
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[GuestCartEntry] {
        &self.entries
    }

    /// Whether the cart holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Quantity currently held for a product.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> Quantity {
        self.entries
            .iter()
            .find(|e| e.product_id == product_id)
            .map_or(Quantity::ZERO, |e| e.quantity)
    }

    /// Total units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| u32::from(e.quantity.get()))
            .sum()
    }

    /// Write a product's quantity (last write wins); zero removes the line.
    pub fn set(&mut self, product_id: ProductId, quantity: Quantity) {
        if quantity.is_zero() {
            self.remove(product_id);
            return;
        }
        self.token.get_or_insert_with(GuestCartToken::generate);
        match self.entries.iter_mut().find(|e| e.product_id == product_id) {
            Some(entry) => entry.quantity = quantity,
            None => self.entries.push(GuestCartEntry {
                product_id,
                quantity,
            }),
        }
    }

    /// Add units to a product's line, capped at the per-item maximum.
    pub fn add(&mut self, product_id: ProductId, quantity: Quantity) {
        let merged = self.quantity_of(product_id).merge(quantity);
        self.set(product_id, merged);
    }

    /// Remove a product's line.
    pub fn remove(&mut self, product_id: ProductId) {
        self.entries.retain(|e| e.product_id != product_id);
    }

    /// Keep only the lines matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&GuestCartEntry) -> bool) {
        self.entries.retain(|e| keep(e));
    }
}

/// A cart line joined with its product, ready for display or checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: ProductId,
    pub handle: String,
    pub title: String,
    pub unit_price: Price,
    pub quantity: Quantity,
    /// Whether the product can still be bought.
    pub available: bool,
}

impl CartLine {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity.get())
    }
}
