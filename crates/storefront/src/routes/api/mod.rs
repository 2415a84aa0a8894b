//! JSON API routes.

pub mod payments;
