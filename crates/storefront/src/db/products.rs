//! Product catalog queries.

use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

use loja_core::{Currency, Price, ProductId};

use super::RepositoryError;
use crate::models::Product;

#[derive(FromRow)]
struct ProductRow {
    id: i32,
    handle: String,
    title: String,
    description: String,
    price: Decimal,
    active: bool,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::new(row.id),
            handle: row.handle,
            title: row.title,
            description: row.description,
            price: Price::new(row.price, Currency::Brl),
            active: row.active,
        }
    }
}

/// Product fields accepted by [`ProductRepository::upsert`].
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub handle: String,
    pub title: String,
    pub description: String,
    pub price: Decimal,
    pub active: bool,
}

/// Repository for catalog reads (and seeding).
pub struct ProductRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ProductRepository<'a> {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// List active products ordered by title.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_active(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, handle, title, description, price, active
            FROM storefront.product
            WHERE active
            ORDER BY title
            ",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Get a product by its URL handle.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_handle(&self, handle: &str) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, handle, title, description, price, active
            FROM storefront.product
            WHERE handle = $1
            ",
        )
        .bind(handle)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    /// Get several products by ID (missing IDs are simply absent).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_many(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let raw: Vec<i32> = ids.iter().map(ProductId::as_i32).collect();
        let rows = sqlx::query_as::<_, ProductRow>(
            r"
            SELECT id, handle, title, description, price, active
            FROM storefront.product
            WHERE id = ANY($1)
            ",
        )
        .bind(&raw)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Insert a product or update it by handle.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    pub async fn upsert(&self, product: &NewProduct) -> Result<Product, RepositoryError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r"
            INSERT INTO storefront.product (handle, title, description, price, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (handle) DO UPDATE
            SET title = EXCLUDED.title,
                description = EXCLUDED.description,
                price = EXCLUDED.price,
                active = EXCLUDED.active,
                updated_at = NOW()
            RETURNING id, handle, title, description, price, active
            ",
        )
        .bind(&product.handle)
        .bind(&product.title)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.active)
        .fetch_one(self.pool)
        .await?;

        Ok(Product::from(row))
    }
}
