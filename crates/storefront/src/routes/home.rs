//! Home page route handler.

use askama::Template;
use askama_web::WebTemplate;
use axum::extract::State;
use tracing::instrument;

use crate::error::Result;
use crate::middleware::OptionalAuth;
use crate::models::CurrentUser;
use crate::routes::products::ProductView;
use crate::state::AppState;

/// Products shown on the home page.
const FEATURED_COUNT: usize = 8;

/// Home page template.
#[derive(Template, WebTemplate)]
#[template(path = "home/index.html")]
pub struct HomeTemplate {
    pub featured: Vec<ProductView>,
    pub current_user: Option<CurrentUser>,
}

/// Display the home page.
#[instrument(skip(state, current_user))]
pub async fn home(
    State(state): State<AppState>,
    OptionalAuth(current_user): OptionalAuth,
) -> Result<HomeTemplate> {
    let products = state.catalog().active_products().await?;

    Ok(HomeTemplate {
        featured: products
            .iter()
            .take(FEATURED_COUNT)
            .map(ProductView::from)
            .collect(),
        current_user,
    })
}
