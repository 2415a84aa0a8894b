//! Integration tests for Loja.
//!
//! The storefront's two stateful flows are exercised here against in-memory
//! stand-ins for the database, the session and the payment provider:
//!
//! - `cart_reconciliation` - guest cart merge through [`CartReconciler`]
//! - `payment_polling` - PIX confirmation through [`poll_payment`]
//! - `checkout_settlement` - order settlement through [`confirm_payment`]
//!
//! ```bash
//! cargo test -p loja-integration-tests
//! ```
//!
//! [`CartReconciler`]: loja_storefront::services::cart::CartReconciler
//! [`poll_payment`]: loja_storefront::services::payments::poll_payment
//! [`confirm_payment`]: loja_storefront::services::checkout::confirm_payment

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

use loja_core::{
    GuestCartToken, OrderId, OrderStatus, PaymentId, PaymentStatus, ProductId, Quantity, UserId,
    merge_delta,
};
use loja_storefront::db::RepositoryError;
use loja_storefront::db::orders::Settlement;
use loja_storefront::models::{GuestCart, PaymentIntent};
use loja_storefront::services::cart::{CartError, CartStore, GuestCartStore, MergeOutcome};
use loja_storefront::services::checkout::OrderSettlement;
use loja_storefront::services::payments::{PaymentError, PaymentStatusSource};

// =============================================================================
// Cart Stores
// =============================================================================

#[derive(Default)]
struct CartState {
    lines: HashMap<(UserId, ProductId), Quantity>,
    ledger: HashMap<(UserId, GuestCartToken, ProductId), Quantity>,
    known: HashSet<ProductId>,
    failing: HashSet<ProductId>,
}

/// Persisted cart with the same ledger rule as the `PostgreSQL` repository.
#[derive(Default)]
pub struct MemoryCartStore {
    state: Mutex<CartState>,
    merges: AtomicU32,
}

impl MemoryCartStore {
    /// A store that sells the given products.
    #[must_use]
    pub fn with_products(ids: impl IntoIterator<Item = i32>) -> Self {
        let store = Self::default();
        store.lock().known = ids.into_iter().map(ProductId::new).collect();
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a persisted line.
    pub fn put(&self, user_id: UserId, product_id: i32, quantity: Quantity) {
        self.lock()
            .lines
            .insert((user_id, ProductId::new(product_id)), quantity);
    }

    /// Make merges of this product fail until [`MemoryCartStore::heal`].
    pub fn fail_on(&self, product_id: i32) {
        self.lock().failing.insert(ProductId::new(product_id));
    }

    /// Stop failing merges.
    pub fn heal(&self) {
        self.lock().failing.clear();
    }

    /// Quantity of a persisted line (zero if absent).
    #[must_use]
    pub fn quantity(&self, user_id: UserId, product_id: i32) -> u8 {
        self.lock()
            .lines
            .get(&(user_id, ProductId::new(product_id)))
            .map_or(0, |q| q.get())
    }

    /// Number of `merge_entry` calls received.
    #[must_use]
    pub fn merge_calls(&self) -> u32 {
        self.merges.load(Ordering::SeqCst)
    }
}

impl CartStore for MemoryCartStore {
    async fn merge_entry(
        &self,
        user_id: UserId,
        token: GuestCartToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<MergeOutcome, CartError> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        if state.failing.contains(&product_id) {
            return Err(CartError::Repository(RepositoryError::Database(
                sqlx::Error::PoolTimedOut,
            )));
        }
        if !state.known.contains(&product_id) {
            return Ok(MergeOutcome::UnknownProduct);
        }

        let key = (user_id, token, product_id);
        let Some(delta) = merge_delta(state.ledger.get(&key).copied(), quantity) else {
            return Ok(MergeOutcome::AlreadyApplied);
        };

        let line = state.lines.entry((user_id, product_id)).or_default();
        *line = line.merge(delta);
        let total = *line;
        state.ledger.insert(key, quantity);

        Ok(MergeOutcome::Applied(total))
    }
}

/// Cart store that parks every merge until released.
#[derive(Default)]
pub struct GatedCartStore {
    pub inner: MemoryCartStore,
    pub entered: Notify,
    pub release: Notify,
}

impl CartStore for GatedCartStore {
    async fn merge_entry(
        &self,
        user_id: UserId,
        token: GuestCartToken,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<MergeOutcome, CartError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner
            .merge_entry(user_id, token, product_id, quantity)
            .await
    }
}

/// Session cart held in memory.
#[derive(Default)]
pub struct MemoryGuestCart {
    cart: Mutex<GuestCart>,
}

impl MemoryGuestCart {
    /// A guest cart holding `(product_id, quantity)` entries.
    #[must_use]
    pub fn with_entries(entries: &[(i32, u8)]) -> Self {
        let mut cart = GuestCart::default();
        for &(product_id, quantity) in entries {
            cart.set(
                ProductId::new(product_id),
                Quantity::saturating_from(i64::from(quantity)),
            );
        }
        Self {
            cart: Mutex::new(cart),
        }
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> GuestCart {
        self.cart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GuestCartStore for MemoryGuestCart {
    async fn load(&self) -> Result<GuestCart, CartError> {
        Ok(self.snapshot())
    }

    async fn save(&self, cart: &GuestCart) -> Result<(), CartError> {
        *self.cart.lock().unwrap_or_else(PoisonError::into_inner) = cart.clone();
        Ok(())
    }

    async fn clear(&self) -> Result<(), CartError> {
        *self.cart.lock().unwrap_or_else(PoisonError::into_inner) = GuestCart::default();
        Ok(())
    }
}

// =============================================================================
// Orders
// =============================================================================

struct OrderEntry {
    user_id: UserId,
    status: OrderStatus,
    payment_id: Option<PaymentId>,
}

#[derive(Default)]
struct OrderState {
    orders: HashMap<OrderId, OrderEntry>,
    cart_clears: HashMap<UserId, u32>,
}

/// Orders with the same conditional transitions as the `PostgreSQL`
/// repository: only a `pending` order moves, and only once.
#[derive(Default)]
pub struct MemoryOrders {
    state: Mutex<OrderState>,
    settles: AtomicU32,
    abandons: AtomicU32,
}

impl MemoryOrders {
    fn lock(&self) -> std::sync::MutexGuard<'_, OrderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a pending order, optionally already paid with `payment_id`.
    pub fn pending(&self, order_id: i32, user_id: UserId, payment_id: Option<&PaymentId>) {
        self.lock().orders.insert(
            OrderId::new(order_id),
            OrderEntry {
                user_id,
                status: OrderStatus::Pending,
                payment_id: payment_id.cloned(),
            },
        );
    }

    /// Current status of an order.
    #[must_use]
    pub fn status(&self, order_id: i32) -> Option<OrderStatus> {
        self.lock()
            .orders
            .get(&OrderId::new(order_id))
            .map(|o| o.status)
    }

    /// How many times a paid order cleared this user's cart.
    #[must_use]
    pub fn cart_clears(&self, user_id: UserId) -> u32 {
        self.lock().cart_clears.get(&user_id).copied().unwrap_or(0)
    }

    /// Number of `settle` calls received.
    #[must_use]
    pub fn settle_calls(&self) -> u32 {
        self.settles.load(Ordering::SeqCst)
    }

    /// Number of `abandon` calls received.
    #[must_use]
    pub fn abandon_calls(&self) -> u32 {
        self.abandons.load(Ordering::SeqCst)
    }
}

impl OrderSettlement for MemoryOrders {
    async fn settle(
        &self,
        order_id: OrderId,
        payment_id: &PaymentId,
        status: OrderStatus,
    ) -> Result<Settlement, RepositoryError> {
        self.settles.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(Settlement::Unchanged);
        };
        if status.is_open()
            || order.status != OrderStatus::Pending
            || order.payment_id.as_ref() != Some(payment_id)
        {
            return Ok(Settlement::Unchanged);
        }

        order.status = status;
        let user_id = order.user_id;
        if status == OrderStatus::Paid {
            *state.cart_clears.entry(user_id).or_default() += 1;
        }

        Ok(Settlement::Applied { user_id })
    }

    async fn abandon(&self, order_id: OrderId) -> Result<bool, RepositoryError> {
        self.abandons.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();

        match state.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::Pending && order.payment_id.is_none() => {
                order.status = OrderStatus::Failed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// Payment Provider
// =============================================================================

/// Payment provider answering from a script, then `pending` forever.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<PaymentStatus, PaymentError>>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<PaymentStatus, PaymentError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of status queries received.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PaymentStatusSource for ScriptedProvider {
    async fn payment_status(&self, payment_id: &PaymentId) -> Result<PaymentIntent, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(PaymentStatus::Pending));

        next.map(|status| PaymentIntent {
            id: payment_id.clone(),
            order_id: None,
            status,
            qr: None,
            expires_at: None,
            provider_status: status.to_string(),
        })
    }
}

/// A provider failure the poller retries.
#[must_use]
pub fn transient_error() -> PaymentError {
    PaymentError::Status {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

/// A provider failure the poller does not retry.
#[must_use]
pub fn definitive_error() -> PaymentError {
    PaymentError::Status {
        status: 404,
        message: "No such payment_intent".to_string(),
    }
}
