//! Checkouts that were created with a provider but not yet captured.
//!
//! The buyer may already have paid when a pending checkout is read back, so
//! with a database configured these live in `storefront.pending_checkouts`
//! and survive restarts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use sqlx::PgPool;
use sqlx::types::Json;

use cardslawp_core::{CurrencyCode, PricedCart, PricedLineItem, ProviderKind, ProviderReference, SessionId};

use super::RepositoryError;

/// Price snapshot taken at checkout creation.
///
/// Capture reconciles the provider-reported amount against this record,
/// never against the current catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCheckout {
    pub provider_reference: ProviderReference,
    pub provider: ProviderKind,
    pub session_id: SessionId,
    pub lines: Vec<PricedLineItem>,
    pub total_minor_units: u64,
    pub currency: CurrencyCode,
    pub created_at: DateTime<Utc>,
}

impl PendingCheckout {
    #[must_use]
    pub fn new(
        provider_reference: ProviderReference,
        provider: ProviderKind,
        session_id: SessionId,
        priced: PricedCart,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_reference,
            provider,
            session_id,
            lines: priced.lines,
            total_minor_units: priced.total_minor_units,
            currency: priced.currency,
            created_at,
        }
    }

    /// The snapshot as a priced cart, for building the order.
    #[must_use]
    pub fn priced(&self) -> PricedCart {
        PricedCart {
            lines: self.lines.clone(),
            total_minor_units: self.total_minor_units,
            currency: self.currency,
        }
    }
}

#[async_trait]
pub trait PendingCheckoutRepository: Send + Sync {
    /// Store a checkout.
    ///
    /// Returns `RepositoryError::Conflict` if the reference is already
    /// pending.
    async fn insert(&self, pending: PendingCheckout) -> Result<(), RepositoryError>;

    async fn get(
        &self,
        reference: &ProviderReference,
    ) -> Result<Option<PendingCheckout>, RepositoryError>;

    /// Forget a checkout once its order is recorded.
    async fn remove(&self, reference: &ProviderReference) -> Result<(), RepositoryError>;
}

// =============================================================================
// In-memory
// =============================================================================

/// Pending checkouts that expire after a fixed TTL.
///
/// Unbounded: an entry only leaves on expiry or capture, never to make room.
#[derive(Clone)]
pub struct InMemoryPendingCheckoutRepository {
    pending: Cache<ProviderReference, PendingCheckout>,
}

impl InMemoryPendingCheckoutRepository {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let pending = Cache::builder().time_to_live(ttl).build();
        Self { pending }
    }
}

#[async_trait]
impl PendingCheckoutRepository for InMemoryPendingCheckoutRepository {
    async fn insert(&self, pending: PendingCheckout) -> Result<(), RepositoryError> {
        let reference = pending.provider_reference.clone();
        let entry = self
            .pending
            .entry(reference.clone())
            .or_insert(pending)
            .await;
        if entry.is_fresh() {
            Ok(())
        } else {
            Err(RepositoryError::Conflict(format!(
                "checkout {reference} is already pending"
            )))
        }
    }

    async fn get(
        &self,
        reference: &ProviderReference,
    ) -> Result<Option<PendingCheckout>, RepositoryError> {
        Ok(self.pending.get(reference).await)
    }

    async fn remove(&self, reference: &ProviderReference) -> Result<(), RepositoryError> {
        self.pending.invalidate(reference).await;
        Ok(())
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Pending checkouts in `storefront.pending_checkouts`.
///
/// Expiry is applied when reading; stale rows are swept on insert.
#[derive(Clone)]
pub struct PgPendingCheckoutRepository {
    pool: PgPool,
    ttl: Duration,
}

impl PgPendingCheckoutRepository {
    #[must_use]
    pub const fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    provider_reference: String,
    provider: String,
    session_id: String,
    lines: Json<Vec<PricedLineItem>>,
    total_minor_units: i64,
    currency: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingCheckout {
    type Error = RepositoryError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let total_minor_units = u64::try_from(row.total_minor_units).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "negative total {} on pending checkout {}",
                row.total_minor_units, row.provider_reference
            ))
        })?;
        let currency = row
            .currency
            .parse()
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid currency: {e}")))?;
        let provider = row
            .provider
            .parse()
            .map_err(|e: String| RepositoryError::DataCorruption(e))?;

        Ok(Self {
            provider_reference: ProviderReference::new(row.provider_reference),
            provider,
            session_id: SessionId::from_token(row.session_id),
            lines: row.lines.0,
            total_minor_units,
            currency,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl PendingCheckoutRepository for PgPendingCheckoutRepository {
    async fn insert(&self, pending: PendingCheckout) -> Result<(), RepositoryError> {
        let total = i64::try_from(pending.total_minor_units).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "total {} does not fit in BIGINT",
                pending.total_minor_units
            ))
        })?;

        let swept = sqlx::query(
            "DELETE FROM storefront.pending_checkouts \
             WHERE created_at <= NOW() - make_interval(secs => $1)",
        )
        .bind(self.ttl.as_secs_f64())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if swept > 0 {
            tracing::debug!(swept, "Expired pending checkouts removed");
        }

        sqlx::query(
            r"
            INSERT INTO storefront.pending_checkouts
                (provider_reference, provider, session_id, lines,
                 total_minor_units, currency, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(pending.provider_reference.as_str())
        .bind(pending.provider.as_str())
        .bind(pending.session_id.as_str())
        .bind(Json(&pending.lines))
        .bind(total)
        .bind(pending.currency.code())
        .bind(pending.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!(
                    "checkout {} is already pending",
                    pending.provider_reference
                ));
            }
            RepositoryError::Database(e)
        })?;

        Ok(())
    }

    async fn get(
        &self,
        reference: &ProviderReference,
    ) -> Result<Option<PendingCheckout>, RepositoryError> {
        let row = sqlx::query_as::<_, PendingRow>(
            r"
            SELECT provider_reference, provider, session_id, lines,
                   total_minor_units, currency, created_at
            FROM storefront.pending_checkouts
            WHERE provider_reference = $1
              AND created_at > NOW() - make_interval(secs => $2)
            ",
        )
        .bind(reference.as_str())
        .bind(self.ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        row.map(PendingCheckout::try_from).transpose()
    }

    async fn remove(&self, reference: &ProviderReference) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM storefront.pending_checkouts WHERE provider_reference = $1")
            .bind(reference.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
