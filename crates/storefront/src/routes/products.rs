//! Product route handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::extract::{Path, State};
use tracing::instrument;

use loja_core::ProductId;

use crate::error::{AppError, Result};
use crate::middleware::OptionalAuth;
use crate::models::{CurrentUser, Product};
use crate::state::AppState;

/// Product display data for templates.
#[derive(Clone)]
pub struct ProductView {
    pub id: ProductId,
    pub handle: String,
    pub title: String,
    pub description: String,
    pub price: String,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            handle: product.handle.clone(),
            title: product.title.clone(),
            description: product.description.clone(),
            price: product.price.to_string(),
        }
    }
}

/// Product listing page template.
#[derive(Template, WebTemplate)]
#[template(path = "products/index.html")]
pub struct ProductsIndexTemplate {
    pub products: Vec<ProductView>,
    pub current_user: Option<CurrentUser>,
}

/// Product detail page template.
#[derive(Template, WebTemplate)]
#[template(path = "products/show.html")]
pub struct ProductShowTemplate {
    pub product: ProductView,
    pub current_user: Option<CurrentUser>,
}

/// Display product listing page.
#[instrument(skip(state, current_user))]
pub async fn index(
    State(state): State<AppState>,
    OptionalAuth(current_user): OptionalAuth,
) -> Result<ProductsIndexTemplate> {
    let products = state.catalog().active_products().await?;

    Ok(ProductsIndexTemplate {
        products: products.iter().map(ProductView::from).collect(),
        current_user,
    })
}

/// Display product detail page.
#[instrument(skip(state, current_user))]
pub async fn show(
    State(state): State<AppState>,
    OptionalAuth(current_user): OptionalAuth,
    Path(handle): Path<String>,
) -> Result<ProductShowTemplate> {
    let product = state
        .catalog()
        .product(&handle)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {handle}")))?;

    Ok(ProductShowTemplate {
        product: ProductView::from(product.as_ref()),
        current_user,
    })
}
