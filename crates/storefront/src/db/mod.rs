//! Storage for the storefront.
//!
//! Every store sits behind an async repository trait so handlers and services
//! never know whether state lives in memory or in `PostgreSQL`.
//!
//! | repository | key | backing |
//! |------------|-----|---------|
//! | [`ProductRepository`] | product id | in-memory catalog |
//! | [`SessionRepository`] | visitor token | `moka` cache with idle expiry |
//! | [`ChallengeRepository`] | identifier | `RwLock<HashMap>` |
//! | [`PendingCheckoutRepository`] | provider reference | `moka` cache with TTL or `storefront.pending_checkouts` |
//! | [`OrderRepository`] | order id, unique provider reference | in memory or `storefront.orders` |
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p cardslawp-cli -- migrate
//! ```

pub mod challenges;
pub mod orders;
pub mod pending;
pub mod products;
pub mod sessions;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use challenges::{ChallengeRepository, InMemoryChallengeRepository};
pub use orders::{InMemoryOrderRepository, OrderRepository, PgOrderRepository};
pub use pending::{
    InMemoryPendingCheckoutRepository, PendingCheckout, PendingCheckoutRepository,
    PgPendingCheckoutRepository,
};
pub use products::{CatalogError, InMemoryProductRepository, ProductRepository, load_catalog};
pub use sessions::{InMemorySessionRepository, SessionRepository};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate provider reference).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
