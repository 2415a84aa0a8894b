//! Domain models for storefront.
//!
//! These types represent validated domain objects separate from database row
//! types; repositories convert rows into them.

pub mod cart;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use cart::{CartLine, GuestCart, GuestCartEntry};
pub use order::{Order, OrderLine, PaymentIntent};
pub use product::Product;
pub use session::{CurrentUser, keys as session_keys};
pub use user::User;
