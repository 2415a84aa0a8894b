//! Loja Core - Shared domain types.
//!
//! This crate provides the types used across the Loja components:
//! - `storefront` - Public-facing shop with cart, checkout and PIX payments
//! - `cli` - Command-line tools for migrations and catalog seeding
//!
//! # Architecture
//!
//! The core crate contains only types and pure rules - no I/O, no database
//! access, no HTTP clients. Cart merge arithmetic lives here so every
//! persistence backend applies exactly the same rule.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, prices, cart quantities and payment statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
