//! Cached catalog reads.
//!
//! Product listings and product pages are read on nearly every request, so
//! they go through a `moka` cache with a 5 minute TTL. Seeding through the
//! CLI runs in another process; its changes show up when entries expire.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::db::{ProductRepository, RepositoryError};
use crate::models::Product;

const LISTING_KEY: &str = "products:active";

#[derive(Clone)]
enum CacheValue {
    Listing(Arc<Vec<Product>>),
    Product(Arc<Product>),
}

/// Read-through cache over [`ProductRepository`].
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<CatalogInner>,
}

struct CatalogInner {
    pool: PgPool,
    cache: Cache<String, CacheValue>,
}

impl Catalog {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300))
            .build();

        Self {
            inner: Arc::new(CatalogInner { pool, cache }),
        }
    }

    /// Active products ordered by title.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the database query fails.
    #[instrument(skip(self))]
    pub async fn active_products(&self) -> Result<Arc<Vec<Product>>, RepositoryError> {
        if let Some(CacheValue::Listing(products)) = self.inner.cache.get(LISTING_KEY).await {
            debug!("Cache hit for product listing");
            return Ok(products);
        }

        let products = Arc::new(
            ProductRepository::new(&self.inner.pool)
                .list_active()
                .await?,
        );

        self.inner
            .cache
            .insert(
                LISTING_KEY.to_owned(),
                CacheValue::Listing(Arc::clone(&products)),
            )
            .await;

        Ok(products)
    }

    /// An active product by handle. Inactive and unknown products are `None`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the database query fails.
    #[instrument(skip(self), fields(handle = %handle))]
    pub async fn product(&self, handle: &str) -> Result<Option<Arc<Product>>, RepositoryError> {
        let cache_key = format!("product:{handle}");

        if let Some(CacheValue::Product(product)) = self.inner.cache.get(&cache_key).await {
            debug!("Cache hit for product");
            return Ok(Some(product));
        }

        let Some(product) = ProductRepository::new(&self.inner.pool)
            .get_by_handle(handle)
            .await?
            .filter(|p| p.active)
        else {
            return Ok(None);
        };

        let product = Arc::new(product);
        self.inner
            .cache
            .insert(cache_key, CacheValue::Product(Arc::clone(&product)))
            .await;

        Ok(Some(product))
    }
}
