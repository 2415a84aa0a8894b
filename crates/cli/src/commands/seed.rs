//! Seed the catalog from a YAML file.
//!
//! ```yaml
//! - handle: cafe-especial
//!   title: Café Especial 250g
//!   description: Torra média, notas de chocolate.
//!   price: "39.90"
//! - handle: caneca
//!   title: Caneca
//!   price: "25.00"
//!   active: false
//! ```

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info};

use loja_core::{Currency, Price};
use loja_storefront::db::create_pool;
use loja_storefront::db::products::{NewProduct, ProductRepository};

use super::migrate::database_url;

/// One product in the seed file.
#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    pub handle: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

/// Check a parsed seed file, returning one message per problem.
#[must_use]
pub fn validate(products: &[SeedProduct]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (i, product) in products.iter().enumerate() {
        let handle = product.handle.trim();
        if handle.is_empty() {
            errors.push(format!("entry {i}: empty handle"));
        } else if !handle
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            errors.push(format!("{handle}: handle must be lowercase letters, digits and '-'"));
        } else if !seen.insert(handle) {
            errors.push(format!("{handle}: duplicate handle"));
        }

        if product.title.trim().is_empty() {
            errors.push(format!("{handle}: empty title"));
        }
        if !is_chargeable(product.price) {
            errors.push(format!("{handle}: price must be positive with at most 2 decimals"));
        }
    }

    errors
}

/// Positive and expressible in whole centavos, as the payment provider
/// charges it.
fn is_chargeable(amount: Decimal) -> bool {
    let price = Price::new(amount, Currency::Brl);
    price
        .to_cents()
        .filter(|cents| *cents > 0)
        .is_some_and(|cents| Price::from_cents(cents) == price)
}

/// Insert or update every product in `file_path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, fails validation,
/// or a database statement fails.
pub async fn products(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    let content = tokio::fs::read_to_string(path).await?;
    let products: Vec<SeedProduct> = serde_yaml::from_str(&content)?;
    info!(products = products.len(), "Parsed seed file");

    let errors = validate(&products);
    if !errors.is_empty() {
        error!("Seed file validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(format!("{} validation errors found", errors.len()).into());
    }

    let pool = create_pool(&database_url()?).await?;
    let repo = ProductRepository::new(&pool);

    for product in products {
        let saved = repo
            .upsert(&NewProduct {
                handle: product.handle.trim().to_owned(),
                title: product.title,
                description: product.description,
                price: product.price,
                active: product.active,
            })
            .await?;
        info!(id = %saved.id, handle = %saved.handle, price = %saved.price, "Product saved");
    }

    info!("Seeding complete!");
    Ok(())
}
