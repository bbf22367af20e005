//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::{
    self, CatalogError, InMemoryChallengeRepository, InMemoryOrderRepository,
    InMemoryPendingCheckoutRepository, InMemoryProductRepository, InMemorySessionRepository,
    OrderRepository, PendingCheckoutRepository, PgOrderRepository, PgPendingCheckoutRepository,
    ProductRepository, load_catalog,
};
use crate::payments::{PayPalAdapter, PaymentProviderAdapter, ProviderRegistry, StripeAdapter};
use crate::services::{
    CheckoutService, CheckoutSettings, CodeSender, SessionManager, SmtpEmailSender,
    TwilioSmsSender, VerificationService,
};

/// Errors assembling the application state at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("SMTP configuration error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// repositories and services the routes call into.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    products: Arc<dyn ProductRepository>,
    sessions: SessionManager,
    verification: VerificationService,
    checkout: CheckoutService,
}

impl AppState {
    /// Start assembling state by hand. Used by tests and by [`AppState::from_config`].
    #[must_use]
    pub fn builder(config: StorefrontConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            pool: None,
            products: None,
            orders: None,
            pending: None,
            providers: Vec::new(),
            senders: Vec::new(),
        }
    }

    /// Build the production state: catalog from disk or the built-in one,
    /// `PostgreSQL` orders and pending checkouts when a database URL is set,
    /// and every provider and
    /// delivery channel the configuration has credentials for.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` if the catalog is invalid, the database is
    /// unreachable, or a client cannot be constructed.
    pub async fn from_config(config: StorefrontConfig) -> Result<Self, StartupError> {
        let catalog = load_catalog(config.catalog_path.as_deref())?;
        db::products::validate_catalog(&catalog, config.currency)?;
        tracing::info!(products = catalog.len(), "Catalog loaded");

        let http = reqwest::Client::builder()
            .timeout(config.checkout.provider_timeout)
            .build()?;

        let mut builder = Self::builder(config.clone())
            .products(Arc::new(InMemoryProductRepository::new(catalog)))
            .provider(Arc::new(StripeAdapter::new(http.clone(), config.stripe.clone())))
            .provider(Arc::new(PayPalAdapter::new(http.clone(), config.paypal.clone())));

        if let Some(database_url) = &config.database_url {
            let pool = db::create_pool(database_url).await?;
            tracing::info!("Database pool created, checkouts and orders stored in PostgreSQL");
            builder = builder
                .orders(Arc::new(PgOrderRepository::new(pool.clone())))
                .pending(Arc::new(PgPendingCheckoutRepository::new(
                    pool.clone(),
                    config.checkout.pending_ttl,
                )))
                .pool(pool);
        } else {
            tracing::warn!("No database configured, checkouts and orders are kept in memory");
        }

        if let Some(smtp) = &config.smtp {
            builder = builder.sender(Arc::new(SmtpEmailSender::new(smtp)?));
        }
        if let Some(twilio) = &config.twilio {
            builder = builder.sender(Arc::new(TwilioSmsSender::new(http, twilio.clone())));
        }

        let state = builder.build()?;
        tracing::info!(
            providers = ?state.checkout().providers().configured(),
            "Payment providers configured"
        );
        Ok(state)
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// The database pool, when orders are stored in `PostgreSQL`.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn products(&self) -> &Arc<dyn ProductRepository> {
        &self.inner.products
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    #[must_use]
    pub fn verification(&self) -> &VerificationService {
        &self.inner.verification
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }
}

/// Builder for [`AppState`].
///
/// Defaults to the built-in catalog, in-memory orders, no payment providers,
/// and no delivery channels.
pub struct AppStateBuilder {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    products: Option<Arc<dyn ProductRepository>>,
    orders: Option<Arc<dyn OrderRepository>>,
    pending: Option<Arc<dyn PendingCheckoutRepository>>,
    providers: Vec<Arc<dyn PaymentProviderAdapter>>,
    senders: Vec<Arc<dyn CodeSender>>,
}

impl AppStateBuilder {
    #[must_use]
    pub fn products(mut self, products: Arc<dyn ProductRepository>) -> Self {
        self.products = Some(products);
        self
    }

    #[must_use]
    pub fn orders(mut self, orders: Arc<dyn OrderRepository>) -> Self {
        self.orders = Some(orders);
        self
    }

    #[must_use]
    pub fn pending(mut self, pending: Arc<dyn PendingCheckoutRepository>) -> Self {
        self.pending = Some(pending);
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn provider(mut self, adapter: Arc<dyn PaymentProviderAdapter>) -> Self {
        self.providers.push(adapter);
        self
    }

    #[must_use]
    pub fn sender(mut self, sender: Arc<dyn CodeSender>) -> Self {
        self.senders.push(sender);
        self
    }

    /// Wire repositories into services.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Catalog` if no catalog was given and the
    /// built-in one fails to parse.
    pub fn build(self) -> Result<AppState, StartupError> {
        let config = self.config;

        let products: Arc<dyn ProductRepository> = match self.products {
            Some(products) => products,
            None => Arc::new(InMemoryProductRepository::builtin()?),
        };
        let orders: Arc<dyn OrderRepository> = self
            .orders
            .unwrap_or_else(|| Arc::new(InMemoryOrderRepository::new()));
        let pending: Arc<dyn PendingCheckoutRepository> = self.pending.unwrap_or_else(|| {
            Arc::new(InMemoryPendingCheckoutRepository::new(
                config.checkout.pending_ttl,
            ))
        });

        let mut providers = ProviderRegistry::new(config.checkout.default_provider);
        for adapter in self.providers {
            providers.register(adapter);
        }

        let sessions = SessionManager::new(
            Arc::new(InMemorySessionRepository::new(config.session_idle)),
            config.session_idle,
        );

        let verification = self.senders.into_iter().fold(
            VerificationService::new(
                Arc::new(InMemoryChallengeRepository::new()),
                config.verification.code_ttl,
                config.verification.expose_codes,
            ),
            VerificationService::with_sender,
        );

        let checkout = CheckoutService::new(
            Arc::clone(&products),
            pending,
            orders,
            providers,
            CheckoutSettings {
                currency: config.currency,
                provider_timeout: config.checkout.provider_timeout,
                return_url: format!("{}/api/checkout/return", config.base_url),
                cancel_url: format!("{}/api/checkout/cancel", config.base_url),
            },
        );

        Ok(AppState {
            inner: Arc::new(AppStateInner {
                config,
                pool: self.pool,
                products,
                sessions,
                verification,
                checkout,
            }),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cardslawp_core::ProductId;

    use super::*;

    #[tokio::test]
    async fn test_builder_defaults() {
        let state = AppState::builder(StorefrontConfig::with_base_url("http://localhost:3000"))
            .build()
            .unwrap();

        assert!(state.pool().is_none());
        assert!(state.checkout().providers().configured().is_empty());
        assert!(
            state
                .products()
                .get(&ProductId::new("amazon-25"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_from_config_without_credentials() {
        let state = AppState::from_config(StorefrontConfig::with_base_url("http://localhost:3000"))
            .await
            .unwrap();
        assert!(state.checkout().providers().configured().is_empty());
        assert!(!state.products().list().await.unwrap().is_empty());
    }
}
