//! Guest cart reconciliation against in-memory stores.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use loja_core::{ProductId, Quantity, UserId};
use loja_integration_tests::{GatedCartStore, MemoryCartStore, MemoryGuestCart};
use loja_storefront::services::cart::{CartReconciler, GuestCartStore};

const USER: UserId = UserId::new(1);

fn q(v: i64) -> Quantity {
    Quantity::for_addition(v).unwrap()
}

// =============================================================================
// Merge Rule
// =============================================================================

#[tokio::test]
async fn test_merge_moves_entries_and_clears_guest_cart() {
    let cart = MemoryCartStore::with_products([1, 2]);
    let guest = MemoryGuestCart::with_entries(&[(1, 2), (2, 5)]);

    let report = CartReconciler::new()
        .reconcile(USER, &cart, &guest)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.merged, 2);
    assert_eq!(cart.quantity(USER, 1), 2);
    assert_eq!(cart.quantity(USER, 2), 5);
    assert!(guest.snapshot().is_empty());
}

#[tokio::test]
async fn test_sum_is_capped_at_99() {
    let cart = MemoryCartStore::with_products([1]);
    cart.put(USER, 1, q(5));
    let guest = MemoryGuestCart::with_entries(&[(1, 97)]);

    CartReconciler::new()
        .reconcile(USER, &cart, &guest)
        .await
        .unwrap();

    assert_eq!(cart.quantity(USER, 1), 99);
}

#[tokio::test]
async fn test_merge_order_does_not_matter() {
    let carts = [(40, 35), (35, 40)];

    for (first, second) in carts {
        let cart = MemoryCartStore::with_products([1]);
        let reconciler = CartReconciler::new();

        for quantity in [first, second] {
            let guest = MemoryGuestCart::with_entries(&[(1, quantity)]);
            reconciler.reconcile(USER, &cart, &guest).await.unwrap();
        }

        assert_eq!(cart.quantity(USER, 1), 75, "order {first} then {second}");
    }

    let cart = MemoryCartStore::with_products([1]);
    let reconciler = CartReconciler::new();
    for quantity in [30, 40, 35] {
        let guest = MemoryGuestCart::with_entries(&[(1, quantity)]);
        reconciler.reconcile(USER, &cart, &guest).await.unwrap();
    }
    assert_eq!(cart.quantity(USER, 1), 99);
}

#[tokio::test]
async fn test_replaying_the_same_guest_cart_adds_nothing() {
    let cart = MemoryCartStore::with_products([1]);
    let guest = MemoryGuestCart::with_entries(&[(1, 3)]);
    let before = guest.snapshot();
    let reconciler = CartReconciler::new();

    reconciler.reconcile(USER, &cart, &guest).await.unwrap();

    // The session write that cleared the cart was lost; same token, same entries.
    guest.save(&before).await.unwrap();
    let replay = reconciler.reconcile(USER, &cart, &guest).await.unwrap();

    assert_eq!(replay.merged, 0);
    assert_eq!(replay.already_merged, 1);
    assert_eq!(cart.quantity(USER, 1), 3);
    assert!(guest.snapshot().is_empty());
}

#[tokio::test]
async fn test_growing_guest_line_merges_only_the_difference() {
    let cart = MemoryCartStore::with_products([1]);
    let guest = MemoryGuestCart::with_entries(&[(1, 3)]);
    let mut later = guest.snapshot();
    let reconciler = CartReconciler::new();

    reconciler.reconcile(USER, &cart, &guest).await.unwrap();

    later.set(ProductId::new(1), q(5));
    guest.save(&later).await.unwrap();
    reconciler.reconcile(USER, &cart, &guest).await.unwrap();

    assert_eq!(cart.quantity(USER, 1), 5);
}

#[tokio::test]
async fn test_empty_guest_cart_does_nothing() {
    let cart = MemoryCartStore::with_products([1]);
    let guest = MemoryGuestCart::default();

    let report = CartReconciler::new()
        .reconcile(USER, &cart, &guest)
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(cart.merge_calls(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_invalid_and_unknown_entries_are_dropped_without_blocking_others() {
    let cart = MemoryCartStore::with_products([1]);
    let guest = MemoryGuestCart::with_entries(&[(0, 2), (1, 4), (999, 1)]);

    let report = CartReconciler::new()
        .reconcile(USER, &cart, &guest)
        .await
        .unwrap();

    assert_eq!(report.merged, 1);
    assert_eq!(report.rejected, vec![ProductId::new(0), ProductId::new(999)]);
    assert!(report.is_complete());
    assert_eq!(cart.quantity(USER, 1), 4);
    assert!(guest.snapshot().is_empty());
    // The malformed ID never reached the store.
    assert_eq!(cart.merge_calls(), 2);
}

#[tokio::test]
async fn test_partial_failure_keeps_entries_for_the_next_run() {
    let cart = MemoryCartStore::with_products([1, 2]);
    cart.fail_on(2);
    let guest = MemoryGuestCart::with_entries(&[(1, 2), (2, 3), (999, 1)]);
    let reconciler = CartReconciler::new();

    let first = reconciler.reconcile(USER, &cart, &guest).await.unwrap();

    assert!(!first.is_complete());
    assert_eq!(first.merged, 1);
    assert_eq!(first.failed, vec![ProductId::new(2)]);
    assert_eq!(first.rejected, vec![ProductId::new(999)]);

    let kept = guest.snapshot();
    assert_eq!(kept.entries().len(), 2);
    assert_eq!(kept.quantity_of(ProductId::new(1)), q(2));
    assert_eq!(kept.quantity_of(ProductId::new(2)), q(3));
    assert_eq!(kept.quantity_of(ProductId::new(999)), Quantity::ZERO);

    cart.heal();
    let second = reconciler.reconcile(USER, &cart, &guest).await.unwrap();

    assert!(second.is_complete());
    assert_eq!(second.already_merged, 1);
    assert_eq!(second.merged, 1);
    assert_eq!(cart.quantity(USER, 1), 2);
    assert_eq!(cart.quantity(USER, 2), 3);
    assert!(guest.snapshot().is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_overlapping_runs_for_one_user_do_not_both_merge() {
    let reconciler = CartReconciler::new();
    let cart = Arc::new(GatedCartStore {
        inner: MemoryCartStore::with_products([1]),
        ..GatedCartStore::default()
    });
    let guest = Arc::new(MemoryGuestCart::with_entries(&[(1, 2)]));

    let running = tokio::spawn({
        let reconciler = reconciler.clone();
        let cart = Arc::clone(&cart);
        let guest = Arc::clone(&guest);
        async move { reconciler.reconcile(USER, cart.as_ref(), guest.as_ref()).await }
    });

    cart.entered.notified().await;
    assert!(reconciler.is_running(USER));

    let other = MemoryCartStore::with_products([1]);
    let second = reconciler
        .reconcile(USER, &other, guest.as_ref())
        .await
        .unwrap();
    assert!(second.skipped);
    assert_eq!(other.merge_calls(), 0);

    // Another user is not blocked.
    let elsewhere = reconciler
        .reconcile(
            UserId::new(2),
            &other,
            &MemoryGuestCart::with_entries(&[(1, 1)]),
        )
        .await
        .unwrap();
    assert!(!elsewhere.skipped);
    assert_eq!(other.quantity(UserId::new(2), 1), 1);

    cart.release.notify_one();
    let first = running.await.unwrap().unwrap();

    assert_eq!(first.merged, 1);
    assert_eq!(cart.inner.quantity(USER, 1), 2);
    assert!(!reconciler.is_running(USER));
    assert!(guest.snapshot().is_empty());
}
