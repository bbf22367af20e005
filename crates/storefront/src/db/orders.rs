//! Order storage.
//!
//! Orders are append-only and unique per provider reference: the unique
//! index is what makes a retried or concurrent capture record at most one
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::RwLock;
use uuid::Uuid;

use cardslawp_core::{Order, OrderId, PricedLineItem, ProviderReference, SessionId};

use super::RepositoryError;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_reference(
        &self,
        reference: &ProviderReference,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Record an order.
    ///
    /// Returns `RepositoryError::Conflict` if an order already exists for
    /// the same provider reference.
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    by_reference: HashMap<ProviderReference, OrderId>,
}

#[derive(Default, Clone)]
pub struct InMemoryOrderRepository {
    table: Arc<RwLock<OrderTable>>,
}

impl InMemoryOrderRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded orders.
    pub async fn len(&self) -> usize {
        self.table.read().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_reference(
        &self,
        reference: &ProviderReference,
    ) -> Result<Option<Order>, RepositoryError> {
        let table = self.table.read().await;
        Ok(table
            .by_reference
            .get(reference)
            .and_then(|id| table.orders.get(id))
            .cloned())
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut table = self.table.write().await;
        if table.by_reference.contains_key(&order.provider_reference) {
            return Err(RepositoryError::Conflict(format!(
                "order already recorded for {}",
                order.provider_reference
            )));
        }
        table
            .by_reference
            .insert(order.provider_reference.clone(), order.id);
        table.orders.insert(order.id, order.clone());
        Ok(())
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Orders in `storefront.orders`.
#[derive(Clone)]
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    buyer_identifier: Option<String>,
    lines: Json<Vec<PricedLineItem>>,
    total_minor_units: i64,
    currency: String,
    provider: String,
    provider_reference: String,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    owner_session: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let total_minor_units = u64::try_from(row.total_minor_units).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "negative total {} on order {}",
                row.total_minor_units, row.id
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
        let status = row
            .status
            .parse()
            .map_err(|e: String| RepositoryError::DataCorruption(e))?;

        Ok(Self {
            id: OrderId::from_uuid(row.id),
            buyer_identifier: row.buyer_identifier,
            lines: row.lines.0,
            total_minor_units,
            currency,
            provider,
            provider_reference: ProviderReference::new(row.provider_reference),
            status,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            owner_session: row.owner_session.map(SessionId::from_token),
        })
    }
}

const SELECT_ORDER: &str = r"
    SELECT id, buyer_identifier, lines, total_minor_units, currency,
           provider, provider_reference, status, failure_reason, created_at,
           owner_session
    FROM storefront.orders
";

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn find_by_reference(
        &self,
        reference: &ProviderReference,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "{SELECT_ORDER} WHERE provider_reference = $1"
        ))
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let total = i64::try_from(order.total_minor_units).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "total {} does not fit BIGINT",
                order.total_minor_units
            ))
        })?;

        sqlx::query(
            r"
            INSERT INTO storefront.orders
                (id, buyer_identifier, lines, total_minor_units, currency,
                 provider, provider_reference, status, failure_reason, created_at,
                 owner_session)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(order.id.as_uuid())
        .bind(order.buyer_identifier.as_deref())
        .bind(Json(&order.lines))
        .bind(total)
        .bind(order.currency.code())
        .bind(order.provider.as_str())
        .bind(order.provider_reference.as_str())
        .bind(order.status.as_str())
        .bind(order.failure_reason.as_deref())
        .bind(order.created_at)
        .bind(order.owner_session.as_ref().map(SessionId::as_str))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(format!(
                    "order already recorded for {}",
                    order.provider_reference
                ));
            }
            RepositoryError::Database(e)
        })?;

        Ok(())
    }
}
