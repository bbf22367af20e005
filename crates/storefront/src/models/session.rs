//! Session-related types.
//!
//! The cookie session carries a single opaque visitor token. Everything else
//! about the visitor (cart, identifiers, verification flags) lives in the
//! session repository under that token.

/// Session keys.
pub mod keys {
    /// Key for the visitor token.
    pub const VISITOR_ID: &str = "visitor_id";
}
