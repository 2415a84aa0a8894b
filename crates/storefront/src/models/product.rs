//! Catalog product.

use loja_core::{Price, ProductId};

/// A product as shown in the storefront.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    /// URL slug, unique.
    pub handle: String,
    pub title: String,
    pub description: String,
    pub price: Price,
    /// Inactive products stay readable for order history but cannot be bought.
    pub active: bool,
}
