//! CardsLawp Core - Domain types for the gift card checkout.
//!
//! This crate provides the types shared by every CardsLawp component:
//! - `storefront` - JSON API serving the catalog, sessions, and checkout
//! - `cli` - Command-line tools for migrations and catalog checks
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Pricing lives here because it must give the same
//! answer regardless of which payment provider later settles the order.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, money, contact identifiers, carts, and orders
//! - [`pricing`] - Cart pricing in integer minor currency units

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod pricing;
pub mod types;

pub use pricing::{CatalogLookup, PricedCart, PricedLineItem, PricingError, price};
pub use types::*;
