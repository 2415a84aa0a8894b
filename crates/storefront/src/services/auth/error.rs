//! Account error types.

use thiserror::Error;

use crate::db::RepositoryError;

/// Errors from registering or logging in.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Email failed validation.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] loja_core::EmailError),

    /// Wrong password or unknown email; deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration for an email that already has an account.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Password does not meet the length rules.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("password hashing error")]
    PasswordHash,
}
