//! Housekeeping for tables that only grow.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use loja_storefront::db::{CartRepository, RepositoryError, create_pool};
use loja_storefront::middleware::SESSION_EXPIRY_SECONDS;

use super::migrate::{MigrationError, database_url};

/// Merge ledger rows are kept this long by default.
pub const DEFAULT_LEDGER_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("retention of {0} days is shorter than the session expiry")]
    RetentionTooShort(u32),

    #[error(transparent)]
    Config(#[from] MigrationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Oldest `merged_at` to keep.
///
/// A guest cart lives in its session, so a ledger row can matter for as long
/// as a session does; shorter retentions are refused.
///
/// # Errors
///
/// Returns `PruneError::RetentionTooShort` if `days` is below the session
/// expiry.
pub fn ledger_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, PruneError> {
    let retention = Duration::days(i64::from(days));
    if retention < Duration::seconds(SESSION_EXPIRY_SECONDS) {
        return Err(PruneError::RetentionTooShort(days));
    }
    Ok(now - retention)
}

/// Delete cart merge ledger rows older than `days`.
///
/// # Errors
///
/// Returns `PruneError` if the retention is too short or the delete fails.
pub async fn merge_ledger(days: u32) -> Result<(), PruneError> {
    let cutoff = ledger_cutoff(Utc::now(), days)?;

    let pool = create_pool(&database_url()?).await?;
    let deleted = CartRepository::new(&pool).prune_merge_ledger(cutoff).await?;

    tracing::info!(deleted, cutoff = %cutoff, "Pruned cart merge ledger");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_cutoff_counts_back_from_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let cutoff = ledger_cutoff(now, DEFAULT_LEDGER_RETENTION_DAYS).unwrap();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_retention_must_outlive_sessions() {
        let now = Utc::now();
        assert!(ledger_cutoff(now, 7).is_ok());
        assert!(matches!(
            ledger_cutoff(now, 6),
            Err(PruneError::RetentionTooShort(6))
        ));
        assert!(ledger_cutoff(now, 0).is_err());
    }
}
