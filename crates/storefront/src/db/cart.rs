//! Persisted cart queries.
//!
//! Every write that grows a line uses the same rule as
//! [`Quantity::merge`]: `LEAST(current + added, 99)`. Because that rule is
//! commutative, concurrent writers (other tabs, other devices) need no locks
//! on `cart_item`; the unique `(user_id, product_id)` constraint plus
//! `ON CONFLICT` makes each write atomic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use loja_core::{Currency, GuestCartToken, Price, ProductId, Quantity, UserId, merge_delta};

use super::RepositoryError;
use crate::models::CartLine;

#[derive(FromRow)]
struct CartLineRow {
    product_id: i32,
    handle: String,
    title: String,
    price: Decimal,
    quantity: i32,
    active: bool,
}

impl From<CartLineRow> for CartLine {
    fn from(row: CartLineRow) -> Self {
        Self {
            product_id: ProductId::new(row.product_id),
            handle: row.handle,
            title: row.title,
            unit_price: Price::new(row.price, Currency::Brl),
            quantity: Quantity::saturating_from(i64::from(row.quantity)),
            available: row.active,
        }
    }
}

/// Result of merging one guest cart entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Units were added; carries the persisted quantity afterwards.
    Applied(Quantity),
    /// An earlier run already merged this entry; nothing changed.
    AlreadyApplied,
    /// The product does not exist or is no longer sold.
    UnknownProduct,
}

/// Repository for the persisted cart.
pub struct CartRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CartRepository<'a> {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Cart lines for a user, joined with their products.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn lines(&self, user_id: UserId) -> Result<Vec<CartLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, CartLineRow>(
            r"
            SELECT c.product_id, p.handle, p.title, p.price, c.quantity, p.active
            FROM storefront.cart_item c
            JOIN storefront.product p ON p.id = c.product_id
            WHERE c.user_id = $1
            ORDER BY c.created_at, c.id
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(CartLine::from).collect())
    }

    /// Total units in a user's cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn item_count(&self, user_id: UserId) -> Result<u32, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM storefront.cart_item
            WHERE user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        u32::try_from(count)
            .map_err(|_| RepositoryError::DataCorruption(format!("negative cart size {count}")))
    }

    /// Add units of an active product, summing with any existing line (capped).
    ///
    /// Returns the resulting quantity, or `None` if the product is not sold.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<Option<Quantity>, RepositoryError> {
        let merged: Option<i32> = sqlx::query_scalar(
            r"
            INSERT INTO storefront.cart_item (user_id, product_id, quantity)
            SELECT $1, p.id, $3
            FROM storefront.product p
            WHERE p.id = $2 AND p.active
            ON CONFLICT (user_id, product_id) DO UPDATE
            SET quantity = LEAST(storefront.cart_item.quantity + EXCLUDED.quantity, 99),
                updated_at = NOW()
            RETURNING quantity
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(i32::from(quantity))
        .fetch_optional(self.pool)
        .await?;

        Ok(merged.map(|q| Quantity::saturating_from(i64::from(q))))
    }

    /// Overwrite a line's quantity; zero deletes the line.
    ///
    /// Returns `false` if the product is not sold (and nothing was written).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<bool, RepositoryError> {
        if quantity.is_zero() {
            self.remove(user_id, product_id).await?;
            return Ok(true);
        }

        let result = sqlx::query(
            r"
            INSERT INTO storefront.cart_item (user_id, product_id, quantity)
            SELECT $1, p.id, $3
            FROM storefront.product p
            WHERE p.id = $2 AND p.active
            ON CONFLICT (user_id, product_id) DO UPDATE
            SET quantity = EXCLUDED.quantity,
                updated_at = NOW()
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(i32::from(quantity))
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a line. Deleting a missing line is not an error.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    pub async fn remove(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            DELETE FROM storefront.cart_item
            WHERE user_id = $1 AND product_id = $2
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Merge one guest cart entry into the user's cart.
    ///
    /// The ledger row for `(user, guest token, product)` is created if needed
    /// and locked, so concurrent merges of the same guest entry serialize and
    /// the second sees what the first applied. Only the difference between
    /// the incoming quantity and what the ledger already recorded is added.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if any statement fails; the
    /// transaction is rolled back and the entry can be retried.
    #[instrument(skip(self))]
    pub async fn merge_guest_entry(
        &self,
        user_id: UserId,
        token: GuestCartToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<MergeOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let sold: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS (
                SELECT 1 FROM storefront.product WHERE id = $1 AND active
            )
            ",
        )
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        if !sold {
            tx.rollback().await?;
            return Ok(MergeOutcome::UnknownProduct);
        }

        sqlx::query(
            r"
            INSERT INTO storefront.cart_merge_ledger (user_id, guest_token, product_id, quantity)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (user_id, guest_token, product_id) DO NOTHING
            ",
        )
        .bind(user_id)
        .bind(token.as_uuid())
        .bind(product_id)
        .execute(&mut *tx)
        .await?;

        let recorded: i32 = sqlx::query_scalar(
            r"
            SELECT quantity
            FROM storefront.cart_merge_ledger
            WHERE user_id = $1 AND guest_token = $2 AND product_id = $3
            FOR UPDATE
            ",
        )
        .bind(user_id)
        .bind(token.as_uuid())
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        let already = Quantity::saturating_from(i64::from(recorded));
        let Some(delta) = merge_delta(Some(already), quantity) else {
            tx.commit().await?;
            return Ok(MergeOutcome::AlreadyApplied);
        };

        let merged: i32 = sqlx::query_scalar(
            r"
            INSERT INTO storefront.cart_item (user_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id) DO UPDATE
            SET quantity = LEAST(storefront.cart_item.quantity + EXCLUDED.quantity, 99),
                updated_at = NOW()
            RETURNING quantity
            ",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(i32::from(delta))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r"
            UPDATE storefront.cart_merge_ledger
            SET quantity = $4, merged_at = NOW()
            WHERE user_id = $1 AND guest_token = $2 AND product_id = $3
            ",
        )
        .bind(user_id)
        .bind(token.as_uuid())
        .bind(product_id)
        .bind(i32::from(quantity))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(MergeOutcome::Applied(Quantity::saturating_from(i64::from(
            merged,
        ))))
    }

    /// Delete merge ledger rows last written before `cutoff`.
    ///
    /// A row is only consulted while some session still holds its guest cart
    /// token, so `cutoff` must lie further back than the session expiry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self))]
    pub async fn prune_merge_ledger(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            DELETE FROM storefront.cart_merge_ledger
            WHERE merged_at < $1
            ",
        )
        .bind(cutoff)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
