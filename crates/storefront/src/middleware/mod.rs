//! HTTP middleware stack for storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, performance transactions)
//! 2. `TraceLayer` (request tracing)
//! 3. Session layer (tower-sessions with `PostgreSQL` store)
//! 4. Guest cart sync (merge the session cart once a user is logged in)

pub mod auth;
pub mod guest_cart_sync;
pub mod session;

pub use auth::{OptionalAuth, RequireAuth, clear_current_user, set_current_user};
pub use guest_cart_sync::{guest_cart_sync_middleware, reconcile_guest_cart};
pub use session::{SESSION_EXPIRY_SECONDS, create_session_layer};
