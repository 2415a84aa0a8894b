//! Guest cart reconciliation.
//!
//! Merges the session cart into the user's persisted cart:
//!
//! 1. Load the guest entries; nothing to do if there are none.
//! 2. Merge each valid entry with the sum-and-cap rule. Invalid entries
//!    (malformed product ID, quantity outside `1..=99`, unknown product) are
//!    rejected one by one and dropped; the rest of the batch continues.
//! 3. If every merge succeeded, clear the guest cart. Otherwise keep it
//!    (minus rejected entries) so the next trigger retries.
//!
//! Retrying is safe because the store records, per guest cart token, what it
//! already merged and only applies the difference. Two triggers for the same
//! user in this process never overlap: the second is a no-op.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::instrument;

use loja_core::{GuestCartToken, ProductId, Quantity, UserId};

use super::CartError;
use crate::db::CartRepository;
use crate::db::cart::MergeOutcome;
use crate::models::GuestCart;

/// Where guest entries live before they are merged.
pub trait GuestCartStore: Send + Sync {
    /// Read the current guest cart (empty if there is none).
    fn load(&self) -> impl Future<Output = Result<GuestCart, CartError>> + Send;

    /// Replace the guest cart; an empty cart clears it.
    fn save(&self, cart: &GuestCart) -> impl Future<Output = Result<(), CartError>> + Send;

    /// Drop every guest entry.
    fn clear(&self) -> impl Future<Output = Result<(), CartError>> + Send;
}

/// The persisted cart guest entries are merged into.
pub trait CartStore: Send + Sync {
    /// Merge one guest entry, applying only what was not applied before for
    /// this `(user, token, product)`.
    fn merge_entry(
        &self,
        user_id: UserId,
        token: GuestCartToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<MergeOutcome, CartError>> + Send;
}

impl CartStore for CartRepository<'_> {
    async fn merge_entry(
        &self,
        user_id: UserId,
        token: GuestCartToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<MergeOutcome, CartError> {
        Ok(self
            .merge_guest_entry(user_id, token, product_id, quantity)
            .await?)
    }
}

/// What one reconciliation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Another run for the same user was in flight; nothing was done.
    pub skipped: bool,
    /// Entries whose units were added to the persisted cart.
    pub merged: usize,
    /// Entries an earlier run had already merged.
    pub already_merged: usize,
    /// Entries dropped as invalid.
    pub rejected: Vec<ProductId>,
    /// Entries whose merge failed; kept for the next run.
    pub failed: Vec<ProductId>,
}

impl ReconcileReport {
    /// Whether the guest cart was fully merged and cleared.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.skipped && self.failed.is_empty()
    }
}

/// Runs reconciliations, at most one per user at a time.
#[derive(Clone, Default)]
pub struct CartReconciler {
    in_flight: Arc<Mutex<HashSet<UserId>>>,
}

/// Marks a user's reconciliation as running until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<UserId>>>,
    user_id: UserId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.user_id);
    }
}

impl CartReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reconciliation for this user is running right now.
    #[must_use]
    pub fn is_running(&self, user_id: UserId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&user_id)
    }

    fn begin(&self, user_id: UserId) -> Option<InFlight> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id);
        inserted.then(|| InFlight {
            set: Arc::clone(&self.in_flight),
            user_id,
        })
    }

    /// Merge the guest cart into `user_id`'s persisted cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError` only if the guest cart itself cannot be read or
    /// written. Individual merge failures are reported in
    /// [`ReconcileReport::failed`] and never abort the batch.
    #[instrument(skip(self, cart, guest), fields(user_id = %user_id))]
    pub async fn reconcile<C, G>(
        &self,
        user_id: UserId,
        cart: &C,
        guest: &G,
    ) -> Result<ReconcileReport, CartError>
    where
        C: CartStore,
        G: GuestCartStore,
    {
        let Some(_in_flight) = self.begin(user_id) else {
            tracing::debug!("Reconciliation already running, skipping");
            return Ok(ReconcileReport {
                skipped: true,
                ..ReconcileReport::default()
            });
        };

        let mut local = guest.load().await?;
        if local.is_empty() {
            return Ok(ReconcileReport::default());
        }

        let token = match local.token() {
            Some(token) => token,
            None => {
                let token = local.ensure_token();
                guest.save(&local).await?;
                token
            }
        };

        let mut report = ReconcileReport::default();

        for entry in local.entries() {
            let valid = entry.product_id.is_well_formed()
                && Quantity::for_addition(i64::from(entry.quantity)).is_ok();
            if !valid {
                tracing::warn!(
                    product_id = %entry.product_id,
                    quantity = %entry.quantity,
                    "Rejecting invalid guest cart entry"
                );
                report.rejected.push(entry.product_id);
                continue;
            }

            match cart
                .merge_entry(user_id, token, entry.product_id, entry.quantity)
                .await
            {
                Ok(MergeOutcome::Applied(total)) => {
                    tracing::debug!(product_id = %entry.product_id, total = %total, "Merged guest entry");
                    report.merged += 1;
                }
                Ok(MergeOutcome::AlreadyApplied) => report.already_merged += 1,
                Ok(MergeOutcome::UnknownProduct) => {
                    tracing::warn!(product_id = %entry.product_id, "Rejecting guest entry for unknown product");
                    report.rejected.push(entry.product_id);
                }
                Err(e) => {
                    tracing::warn!(
                        product_id = %entry.product_id,
                        error = %e,
                        "Guest entry merge failed, keeping it for retry"
                    );
                    report.failed.push(entry.product_id);
                }
            }
        }

        if report.failed.is_empty() {
            guest.clear().await?;
        } else if !report.rejected.is_empty() {
            let mut current = guest.load().await?;
            current.retain(|e| !report.rejected.contains(&e.product_id));
            guest.save(&current).await?;
        }

        tracing::info!(
            merged = report.merged,
            already_merged = report.already_merged,
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Guest cart reconciled"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_is_released_on_drop() {
        let reconciler = CartReconciler::new();
        let user = UserId::new(7);

        let guard = reconciler.begin(user);
        assert!(guard.is_some());
        assert!(reconciler.is_running(user));
        assert!(reconciler.begin(user).is_none());
        assert!(reconciler.begin(UserId::new(8)).is_some());

        drop(guard);
        assert!(!reconciler.is_running(user));
        assert!(reconciler.begin(user).is_some());
    }

    #[test]
    fn test_report_completion() {
        assert!(ReconcileReport::default().is_complete());
        assert!(
            !ReconcileReport {
                skipped: true,
                ..ReconcileReport::default()
            }
            .is_complete()
        );
        assert!(
            !ReconcileReport {
                failed: vec![ProductId::new(1)],
                ..ReconcileReport::default()
            }
            .is_complete()
        );
    }
}
