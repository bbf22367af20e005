//! Checkout orchestration.
//!
//! Two phases against a payment provider:
//!
//! 1. **Create** prices the cart from the catalog, creates the provider-side
//!    payment object, and stores a [`PendingCheckout`] snapshot keyed by the
//!    provider reference.
//! 2. **Capture** confirms payment with the provider, reconciles the
//!    collected amount against the snapshot, and records exactly one order
//!    per reference.
//!
//! Both phases run with the caller holding the session lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use cardslawp_core::{
    Cart, CartError, CartLineInput, CurrencyCode, Money, Order, OrderError, OrderStatus,
    PricingError, ProductId, ProviderKind, ProviderReference, VisitorSession, price,
};

use crate::db::{
    OrderRepository, PendingCheckout, PendingCheckoutRepository, ProductRepository,
    RepositoryError,
};
use crate::payments::{
    CaptureStatus, PaymentProviderAdapter, PaymentRequest, ProviderError, ProviderHandle,
    ProviderRegistry,
};

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("cart is empty")]
    EmptyCart,

    /// Provider missing, unconfigured, unreachable, or too slow.
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// The provider collected a different amount than was priced.
    #[error("amount mismatch: expected {expected}, captured {captured}")]
    AmountMismatch { expected: Money, captured: Money },

    /// No checkout with this reference belongs to the caller.
    #[error("unknown checkout: {0}")]
    UnknownCheckout(ProviderReference),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("order state error: {0}")]
    Order(#[from] OrderError),
}

impl From<CartError> for CheckoutError {
    fn from(err: CartError) -> Self {
        Self::Pricing(err.into())
    }
}

impl From<ProviderError> for CheckoutError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured | ProviderError::Unavailable(_) => {
                Self::ProviderUnavailable(err.to_string())
            }
            ProviderError::Declined(_) | ProviderError::Api { .. } | ProviderError::Protocol(_) => {
                Self::PaymentFailed(err.to_string())
            }
        }
    }
}

/// Input to [`CheckoutService::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateCheckout {
    /// Replaces the session cart when present.
    pub cart: Option<Vec<CartLineInput>>,
    /// Falls back to the configured default provider.
    pub provider: Option<ProviderKind>,
}

/// What the client needs to continue with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutCreated {
    pub provider: ProviderKind,
    pub provider_handle: ProviderHandle,
    pub total_minor_units: u64,
    pub currency: CurrencyCode,
}

/// Settings for [`CheckoutService`].
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: CurrencyCode,
    pub provider_timeout: Duration,
    /// Where providers send the buyer after paying.
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Clone)]
pub struct CheckoutService {
    products: Arc<dyn ProductRepository>,
    pending: Arc<dyn PendingCheckoutRepository>,
    orders: Arc<dyn OrderRepository>,
    providers: ProviderRegistry,
    settings: CheckoutSettings,
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        products: Arc<dyn ProductRepository>,
        pending: Arc<dyn PendingCheckoutRepository>,
        orders: Arc<dyn OrderRepository>,
        providers: ProviderRegistry,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            products,
            pending,
            orders,
            providers,
            settings,
        }
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Start a checkout for the session's cart (or `request.cart`).
    ///
    /// The session cart is replaced by the priced cart only when the provider
    /// accepted the payment; the caller persists the session on success.
    ///
    /// # Errors
    ///
    /// - `EmptyCart`, `Pricing` for carts that cannot be priced
    /// - `ProviderUnavailable` if the provider is missing, unconfigured, or times out
    /// - `PaymentFailed` if the provider rejects the payment
    #[instrument(skip(self, session, request), fields(provider))]
    pub async fn create(
        &self,
        session: &mut VisitorSession,
        request: CreateCheckout,
    ) -> Result<CheckoutCreated, CheckoutError> {
        let cart = match request.cart {
            Some(lines) => Cart::from_inputs(&lines)?,
            None => session.cart.clone(),
        };
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let ids: Vec<ProductId> = cart.lines().iter().map(|l| l.product_id.clone()).collect();
        let catalog = self.products.snapshot(&ids).await?;
        let priced = price(&cart, &catalog, self.settings.currency)?;

        let adapter = self.configured_adapter(request.provider)?;
        let kind = adapter.kind();
        tracing::Span::current().record("provider", kind.as_str());

        let payment = PaymentRequest {
            checkout_id: Uuid::new_v4().to_string(),
            lines: priced.lines.clone(),
            total: priced.total(),
            return_url: self.settings.return_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
        };
        let handle = self
            .call_provider(kind, adapter.create_payment(&payment))
            .await?;
        let reference = handle.reference().clone();

        self.pending
            .insert(PendingCheckout::new(
                reference.clone(),
                kind,
                session.id.clone(),
                priced.clone(),
                Utc::now(),
            ))
            .await?;
        session.cart = cart;

        tracing::info!(
            reference = %reference,
            total_minor = priced.total_minor_units,
            "Checkout created"
        );

        Ok(CheckoutCreated {
            provider: kind,
            provider_handle: handle,
            total_minor_units: priced.total_minor_units,
            currency: priced.currency,
        })
    }

    /// Confirm payment for `reference` and record the order.
    ///
    /// Idempotent: a reference that already has a captured order returns
    /// that order without calling the provider again, but only to the
    /// session that created the checkout.
    ///
    /// # Errors
    ///
    /// - `UnknownCheckout` if the reference was not created by this session,
    ///   or its pending checkout expired before an order was recorded
    /// - `PaymentFailed` if the provider has not collected the payment, or a
    ///   previous attempt recorded a failure
    /// - `AmountMismatch` if the collected amount differs from the priced total
    /// - `ProviderUnavailable` on provider timeouts and outages
    #[instrument(skip(self, session), fields(reference = %reference))]
    pub async fn capture(
        &self,
        session: &mut VisitorSession,
        reference: &ProviderReference,
    ) -> Result<Order, CheckoutError> {
        if let Some(order) = self.orders.find_by_reference(reference).await? {
            if !order.is_owned_by(&session.id) {
                tracing::warn!("Capture of a recorded order attempted from a different session");
                return Err(CheckoutError::UnknownCheckout(reference.clone()));
            }
            tracing::info!(order_id = %order.id, status = %order.status, "Order already recorded");
            return settled(order);
        }

        let Some(pending) = self.pending.get(reference).await? else {
            return Err(CheckoutError::UnknownCheckout(reference.clone()));
        };
        if pending.session_id != session.id {
            tracing::warn!("Capture attempted from a different session");
            return Err(CheckoutError::UnknownCheckout(reference.clone()));
        }

        let adapter = self.configured_adapter(Some(pending.provider))?;
        let result = self
            .call_provider(pending.provider, adapter.capture_payment(reference))
            .await?;

        match result.status {
            CaptureStatus::Completed => {}
            CaptureStatus::Pending => {
                return Err(CheckoutError::PaymentFailed(
                    "payment has not been completed".to_owned(),
                ));
            }
            CaptureStatus::Declined(reason) => return Err(CheckoutError::PaymentFailed(reason)),
        }

        let mut order = Order::new(
            pending.priced(),
            session.buyer_identifier(),
            pending.provider,
            reference.clone(),
            Utc::now(),
        )
        .owned_by(pending.session_id.clone());

        let expected = Money::from_minor(pending.total_minor_units, pending.currency);
        let captured = Money::from_minor(result.amount_minor_units, result.currency);
        if expected != captured {
            tracing::error!(
                expected_minor = expected.amount_minor_units,
                captured_minor = captured.amount_minor_units,
                expected_currency = %expected.currency,
                captured_currency = %captured.currency,
                "Captured amount does not match checkout total"
            );
            order.mark_failed(format!(
                "amount mismatch: expected {expected}, captured {captured}"
            ))?;
            self.record(&order).await?;
            self.forget_pending(reference).await;
            return Err(CheckoutError::AmountMismatch { expected, captured });
        }

        order.mark_captured()?;
        let order = self.record(&order).await?;
        self.forget_pending(reference).await;
        let order = settled(order)?;
        session.cart.clear();

        tracing::info!(
            order_id = %order.id,
            total_minor = order.total_minor_units,
            "Order captured"
        );
        Ok(order)
    }

    fn configured_adapter(
        &self,
        kind: Option<ProviderKind>,
    ) -> Result<Arc<dyn PaymentProviderAdapter>, CheckoutError> {
        let wanted = kind.unwrap_or_else(|| self.providers.default_kind());
        self.providers
            .resolve(Some(wanted))
            .filter(|adapter| adapter.is_configured())
            .ok_or_else(|| CheckoutError::ProviderUnavailable(format!("{wanted} is not configured")))
    }

    /// Run a provider call under the configured timeout.
    async fn call_provider<T>(
        &self,
        kind: ProviderKind,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, CheckoutError> {
        match tokio::time::timeout(self.settings.provider_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::warn!(provider = %kind, error = %err, "Payment provider call failed");
                Err(err.into())
            }
            Err(_) => {
                tracing::warn!(
                    provider = %kind,
                    timeout_secs = self.settings.provider_timeout.as_secs(),
                    "Payment provider call timed out"
                );
                Err(CheckoutError::ProviderUnavailable(format!(
                    "{kind} did not respond in time"
                )))
            }
        }
    }

    /// Drop the pending checkout once its order is recorded. The order is
    /// authoritative from here on, so a failure only leaves a row to expire.
    async fn forget_pending(&self, reference: &ProviderReference) {
        if let Err(err) = self.pending.remove(reference).await {
            tracing::warn!(error = %err, "Failed to remove pending checkout");
        }
    }

    /// Insert `order`; if another capture won the race, return the winner.
    async fn record(&self, order: &Order) -> Result<Order, CheckoutError> {
        match self.orders.insert(order).await {
            Ok(()) => Ok(order.clone()),
            Err(RepositoryError::Conflict(_)) => {
                tracing::info!("Concurrent capture recorded the order first");
                Ok(self
                    .orders
                    .find_by_reference(&order.provider_reference)
                    .await?
                    .ok_or(RepositoryError::NotFound)?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Map a recorded order to the capture outcome it stands for.
fn settled(order: Order) -> Result<Order, CheckoutError> {
    match order.status {
        OrderStatus::Captured => Ok(order),
        OrderStatus::Failed => Err(CheckoutError::PaymentFailed(
            order
                .failure_reason
                .unwrap_or_else(|| "payment failed".to_owned()),
        )),
        OrderStatus::Created => Err(CheckoutError::PaymentFailed(
            "payment has not been completed".to_owned(),
        )),
    }
}
