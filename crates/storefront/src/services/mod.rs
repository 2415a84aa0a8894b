//! Business logic services for storefront.
//!
//! # Services
//!
//! - `auth` - Password accounts
//! - `cart` - Guest and persisted carts, guest cart reconciliation
//! - `catalog` - Cached product reads
//! - `checkout` - Orders paid with PIX and their settlement
//! - `payments` - Stripe PIX client and the confirmation poller

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod payments;
