//! Authentication route handlers.
//!
//! Errors are passed back to the form as `?error=<code>` so a failed POST
//! always ends in a redirect.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::instrument;

use crate::error::{clear_sentry_user, set_sentry_user};
use crate::middleware::{clear_current_user, reconcile_guest_cart, set_current_user};
use crate::models::{CurrentUser, User};
use crate::services::auth::{AuthError, AuthService};
use crate::state::AppState;

// =============================================================================
// Form Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
}

/// Query parameters for error display.
#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub error: Option<String>,
}

/// Human-readable text for an error code.
fn error_message(code: Option<&str>) -> Option<&'static str> {
    Some(match code? {
        "credentials" => "E-mail ou senha incorretos.",
        "email_taken" => "Já existe uma conta com este e-mail.",
        "invalid_email" => "Informe um e-mail válido.",
        "password_mismatch" => "As senhas não conferem.",
        "weak_password" => "A senha deve ter entre 8 e 128 caracteres.",
        "session" => "Não foi possível iniciar a sessão. Tente novamente.",
        _ => "Algo deu errado. Tente novamente.",
    })
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Template, WebTemplate)]
#[template(path = "auth/login.html")]
pub struct LoginTemplate {
    pub error: Option<&'static str>,
    pub current_user: Option<CurrentUser>,
}

#[derive(Template, WebTemplate)]
#[template(path = "auth/register.html")]
pub struct RegisterTemplate {
    pub error: Option<&'static str>,
    pub current_user: Option<CurrentUser>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Display the login page.
pub async fn login_page(Query(query): Query<MessageQuery>) -> impl IntoResponse {
    LoginTemplate {
        error: error_message(query.error.as_deref()),
        current_user: None,
    }
}

/// Handle login form submission.
///
/// On success the guest cart is merged into the account right away, so the
/// cart page shown next already contains it.
#[instrument(skip(state, session, form))]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    match AuthService::new(state.pool())
        .login(&form.email, &form.password)
        .await
    {
        Ok(user) => start_session(&state, &session, &user, "/account").await,
        Err(AuthError::InvalidCredentials) => {
            tracing::info!("Login failed: invalid credentials");
            Redirect::to("/auth/login?error=credentials").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Login failed");
            Redirect::to("/auth/login?error=failed").into_response()
        }
    }
}

/// Display the registration page.
pub async fn register_page(Query(query): Query<MessageQuery>) -> impl IntoResponse {
    RegisterTemplate {
        error: error_message(query.error.as_deref()),
        current_user: None,
    }
}

/// Handle registration form submission. New accounts are logged in directly.
#[instrument(skip(state, session, form))]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> Response {
    if form.password != form.password_confirm {
        return Redirect::to("/auth/register?error=password_mismatch").into_response();
    }

    match AuthService::new(state.pool())
        .register(&form.email, &form.password)
        .await
    {
        Ok(user) => {
            tracing::info!(user_id = %user.id, "Account created");
            start_session(&state, &session, &user, "/account").await
        }
        Err(e) => {
            let code = match e {
                AuthError::UserAlreadyExists => "email_taken",
                AuthError::InvalidEmail(_) => "invalid_email",
                AuthError::WeakPassword(_) => "weak_password",
                other => {
                    tracing::error!(error = %other, "Registration failed");
                    "failed"
                }
            };
            Redirect::to(&format!("/auth/register?error={code}")).into_response()
        }
    }
}

/// Log out. The guest cart was merged at login, so nothing else is kept.
#[instrument(skip(session))]
pub async fn logout(session: Session) -> Response {
    if let Err(e) = clear_current_user(&session).await {
        tracing::error!(error = %e, "Failed to clear session user");
    }
    clear_sentry_user();
    Redirect::to("/").into_response()
}

async fn start_session(state: &AppState, session: &Session, user: &User, to: &str) -> Response {
    let current = CurrentUser::from(user);
    if let Err(e) = set_current_user(session, &current).await {
        tracing::error!(error = %e, "Failed to set session");
        return Redirect::to("/auth/login?error=session").into_response();
    }
    set_sentry_user(&current.id, Some(current.email.as_str()));

    reconcile_guest_cart(state, session, current.id).await;

    Redirect::to(to).into_response()
}
