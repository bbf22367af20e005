//! Storefront-local models.
//!
//! Domain types live in `cardslawp_core`; this module only holds what the
//! HTTP layer keeps in the session cookie.

pub mod session;

pub use session::keys as session_keys;
