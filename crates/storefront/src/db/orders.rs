//! Order queries.
//!
//! Orders leave `pending` through conditional updates that at most one caller
//! can win: [`OrderRepository::settle`] once the payment is terminal, or
//! [`OrderRepository::abandon`] when no payment could be issued.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

use loja_core::{Currency, OrderId, OrderStatus, PaymentId, Price, ProductId, UserId};

use super::RepositoryError;
use crate::models::{CartLine, Order, OrderLine};

#[derive(FromRow)]
struct OrderRow {
    id: i32,
    user_id: i32,
    status: OrderStatus,
    total: Decimal,
    payment_id: Option<String>,
    pix_qr: Option<String>,
    pix_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> Result<Order, RepositoryError> {
        let payment_id = self
            .payment_id
            .as_deref()
            .map(PaymentId::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid payment id in database: {e}"))
            })?;

        Ok(Order {
            id: OrderId::new(self.id),
            user_id: UserId::new(self.user_id),
            status: self.status,
            total: Price::new(self.total, Currency::Brl),
            payment_id,
            pix_qr: self.pix_qr,
            pix_expires_at: self.pix_expires_at,
            created_at: self.created_at,
            settled_at: self.settled_at,
            lines,
        })
    }
}

#[derive(FromRow)]
struct OrderLineRow {
    order_id: i32,
    product_id: i32,
    title: String,
    quantity: i32,
    unit_price: Decimal,
}

impl TryFrom<OrderLineRow> for OrderLine {
    type Error = RepositoryError;

    fn try_from(row: OrderLineRow) -> Result<Self, Self::Error> {
        let quantity = u8::try_from(row.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("invalid line quantity {}", row.quantity))
        })?;
        Ok(Self {
            product_id: ProductId::new(row.product_id),
            title: row.title,
            quantity,
            unit_price: Price::new(row.unit_price, Currency::Brl),
        })
    }
}

/// Result of trying to settle an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// This call moved the order out of `pending`.
    Applied { user_id: UserId },
    /// The order was already settled (or never matched the payment).
    Unchanged,
}

/// Repository for orders and their lines.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending order from cart lines.
    ///
    /// Unavailable lines are skipped; the caller checks that something is left.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no line is available.
    /// Returns `RepositoryError::Database` if a statement fails.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn create_pending(
        &self,
        user_id: UserId,
        lines: &[CartLine],
    ) -> Result<Order, RepositoryError> {
        let lines: Vec<&CartLine> = lines.iter().filter(|l| l.available).collect();
        if lines.is_empty() {
            return Err(RepositoryError::NotFound);
        }

        let total = lines
            .iter()
            .fold(Price::zero(), |acc, line| acc.plus(&line.line_total()));

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(
            r"
            INSERT INTO storefront.customer_order (user_id, total)
            VALUES ($1, $2)
            RETURNING id, user_id, status, total, payment_id, pix_qr, pix_expires_at,
                      created_at, settled_at
            ",
        )
        .bind(user_id)
        .bind(total.amount)
        .fetch_one(&mut *tx)
        .await?;

        let mut order_lines = Vec::with_capacity(lines.len());
        for line in lines {
            sqlx::query(
                r"
                INSERT INTO storefront.order_line (order_id, product_id, title, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(row.id)
            .bind(line.product_id)
            .bind(&line.title)
            .bind(i32::from(line.quantity))
            .bind(line.unit_price.amount)
            .execute(&mut *tx)
            .await?;

            order_lines.push(OrderLine {
                product_id: line.product_id,
                title: line.title.clone(),
                quantity: line.quantity.get(),
                unit_price: line.unit_price,
            });
        }

        tx.commit().await?;

        row.into_order(order_lines)
    }

    /// Record the PIX payment issued for an order.
    ///
    /// The payment reference is write-once: returns `false` if the order
    /// already carries one.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self, qr))]
    pub async fn attach_payment(
        &self,
        order_id: OrderId,
        payment_id: &PaymentId,
        qr: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.customer_order
            SET payment_id = $2, pix_qr = $3, pix_expires_at = $4
            WHERE id = $1 AND payment_id IS NULL
            ",
        )
        .bind(order_id)
        .bind(payment_id.as_str())
        .bind(qr)
        .bind(expires_at)
        .execute(self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "payment"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get an order with its lines.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let Some(row) = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, status, total, payment_id, pix_qr, pix_expires_at,
                   created_at, settled_at
            FROM storefront.customer_order
            WHERE id = $1
            ",
        )
        .bind(order_id)
        .fetch_optional(self.pool)
        .await?
        else {
            return Ok(None);
        };

        let lines = self.lines_for(&[row.id]).await?;
        let lines = lines.into_iter().map(|(_, line)| line).collect();
        row.into_order(lines).map(Some)
    }

    /// Get the order a payment was issued for.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn get_by_payment_id(
        &self,
        payment_id: &PaymentId,
    ) -> Result<Option<Order>, RepositoryError> {
        let order_id: Option<i32> = sqlx::query_scalar(
            r"
            SELECT id FROM storefront.customer_order WHERE payment_id = $1
            ",
        )
        .bind(payment_id.as_str())
        .fetch_optional(self.pool)
        .await?;

        match order_id {
            Some(id) => self.get(OrderId::new(id)).await,
            None => Ok(None),
        }
    }

    /// Orders placed by a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, user_id, status, total, payment_id, pix_qr, pix_expires_at,
                   created_at, settled_at
            FROM storefront.customer_order
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 50
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
        let mut by_order: HashMap<i32, Vec<OrderLine>> = HashMap::new();
        for (order_id, line) in self.lines_for(&ids).await? {
            by_order.entry(order_id).or_default().push(line);
        }

        rows.into_iter()
            .map(|row| {
                let lines = by_order.remove(&row.id).unwrap_or_default();
                row.into_order(lines)
            })
            .collect()
    }

    /// Move a pending order to the status a terminal payment settles it into.
    ///
    /// Applies only while the order is `pending` and still references
    /// `payment_id`. When the order becomes `paid`, the purchased products are
    /// removed from the buyer's cart in the same transaction, so the cart is
    /// cleared exactly once no matter how many callers race here.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a statement fails.
    #[instrument(skip(self))]
    pub async fn settle(
        &self,
        order_id: OrderId,
        payment_id: &PaymentId,
        status: OrderStatus,
    ) -> Result<Settlement, RepositoryError> {
        if status.is_open() {
            return Ok(Settlement::Unchanged);
        }

        let mut tx = self.pool.begin().await?;

        let user_id: Option<i32> = sqlx::query_scalar(
            r"
            UPDATE storefront.customer_order
            SET status = $3, settled_at = NOW()
            WHERE id = $1 AND payment_id = $2 AND status = 'pending'
            RETURNING user_id
            ",
        )
        .bind(order_id)
        .bind(payment_id.as_str())
        .bind(status)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id.map(UserId::new) else {
            tx.rollback().await?;
            return Ok(Settlement::Unchanged);
        };

        if status == OrderStatus::Paid {
            sqlx::query(
                r"
                DELETE FROM storefront.cart_item
                WHERE user_id = $1
                  AND product_id IN (
                      SELECT product_id FROM storefront.order_line WHERE order_id = $2
                  )
                ",
            )
            .bind(user_id)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(Settlement::Applied { user_id })
    }

    /// Fail a pending order that has no payment attached.
    ///
    /// Returns `false` if the order already has a payment or left `pending`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the statement fails.
    #[instrument(skip(self))]
    pub async fn abandon(&self, order_id: OrderId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE storefront.customer_order
            SET status = 'failed', settled_at = NOW()
            WHERE id = $1 AND status = 'pending' AND payment_id IS NULL
            ",
        )
        .bind(order_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn lines_for(&self, order_ids: &[i32]) -> Result<Vec<(i32, OrderLine)>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderLineRow>(
            r"
            SELECT order_id, product_id, title, quantity, unit_price
            FROM storefront.order_line
            WHERE order_id = ANY($1)
            ORDER BY order_id, title
            ",
        )
        .bind(order_ids)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let order_id = row.order_id;
                OrderLine::try_from(row).map(|line| (order_id, line))
            })
            .collect()
    }
}
