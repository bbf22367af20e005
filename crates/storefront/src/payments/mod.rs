//! Payment provider adapters.
//!
//! Each provider implements [`PaymentProviderAdapter`]; the checkout
//! orchestrator only ever talks to the trait.
//!
//! | provider | create | confirm |
//! |----------|--------|---------|
//! | Stripe | hosted Checkout Session, buyer is redirected | retrieve the session and read `payment_status` |
//! | PayPal | Orders v2 order, buyer approves client side | capture the order |

pub mod paypal;
pub mod stripe;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use cardslawp_core::{CurrencyCode, Money, PricedLineItem, ProviderKind, ProviderReference};

pub use paypal::PayPalAdapter;
pub use stripe::StripeAdapter;

/// Maximum characters of a provider error body kept in logs.
pub(crate) const MAX_LOGGED_BODY: usize = 500;

/// Errors reported by a payment provider adapter.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The adapter has no credentials.
    #[error("provider is not configured")]
    NotConfigured,

    /// The provider could not be reached.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the payment.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The provider answered with an error status.
    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider answered with something we could not interpret.
    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// What the orchestrator asks a provider to charge.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Our correlation id, echoed back by providers that support it.
    pub checkout_id: String,
    pub lines: Vec<PricedLineItem>,
    pub total: Money,
    /// Where the buyer lands after paying. Redirect providers append the reference.
    pub return_url: String,
    pub cancel_url: String,
}

/// How the client continues after a payment object was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProviderHandle {
    /// Send the buyer to `url`; they come back to the return URL.
    #[serde(rename_all = "camelCase")]
    Redirect {
        reference: ProviderReference,
        url: String,
    },
    /// The client approves `reference` with the provider's SDK, then asks us to capture.
    #[serde(rename_all = "camelCase")]
    Approval {
        reference: ProviderReference,
        #[serde(skip_serializing_if = "Option::is_none")]
        approve_url: Option<String>,
    },
}

impl ProviderHandle {
    #[must_use]
    pub const fn reference(&self) -> &ProviderReference {
        match self {
            Self::Redirect { reference, .. } | Self::Approval { reference, .. } => reference,
        }
    }
}

/// Outcome of a capture or confirmation as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Completed,
    /// Not paid yet (buyer has not finished, or funds are held).
    Pending,
    Declined(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    pub reference: ProviderReference,
    pub status: CaptureStatus,
    /// Amount the provider says it collected, in minor units.
    pub amount_minor_units: u64,
    pub currency: CurrencyCode,
}

/// A payment provider.
#[async_trait]
pub trait PaymentProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether credentials are present. Unconfigured adapters are never called.
    fn is_configured(&self) -> bool;

    /// Create the provider-side payment object for `request`.
    async fn create_payment(&self, request: &PaymentRequest)
    -> Result<ProviderHandle, ProviderError>;

    /// Capture or confirm the payment identified by `reference`.
    ///
    /// Must be safe to call again after a timeout: a payment that was already
    /// captured reports `Completed` with the captured amount.
    async fn capture_payment(
        &self,
        reference: &ProviderReference,
    ) -> Result<CaptureResult, ProviderError>;
}

/// The adapters available to the orchestrator, keyed by provider.
#[derive(Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn PaymentProviderAdapter>>,
    default: ProviderKind,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new(default: ProviderKind) -> Self {
        Self {
            adapters: HashMap::new(),
            default,
        }
    }

    /// Register `adapter`, replacing any adapter of the same kind.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn PaymentProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn PaymentProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    #[must_use]
    pub const fn default_kind(&self) -> ProviderKind {
        self.default
    }

    /// The adapter for `kind`, or the default provider when `None`.
    #[must_use]
    pub fn resolve(&self, kind: Option<ProviderKind>) -> Option<Arc<dyn PaymentProviderAdapter>> {
        self.adapters.get(&kind.unwrap_or(self.default)).cloned()
    }

    /// Providers that are registered and have credentials.
    #[must_use]
    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self
            .adapters
            .values()
            .filter(|a| a.is_configured())
            .map(|a| a.kind())
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

/// Read a non-success response body into a `ProviderError`.
///
/// 5xx answers are `Unavailable`; anything else is `Api`.
pub(crate) async fn api_error(provider: ProviderKind, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body = truncate(&body, MAX_LOGGED_BODY);
    tracing::error!(
        provider = %provider,
        status = status.as_u16(),
        body = %body,
        "Payment provider returned error status"
    );
    if status.is_server_error() {
        return ProviderError::Unavailable(format!("{provider} returned {status}"));
    }
    ProviderError::Api {
        status: status.as_u16(),
        message: body.to_owned(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Fixed {
        kind: ProviderKind,
        configured: bool,
    }

    #[async_trait]
    impl PaymentProviderAdapter for Fixed {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn create_payment(
            &self,
            _request: &PaymentRequest,
        ) -> Result<ProviderHandle, ProviderError> {
            Err(ProviderError::NotConfigured)
        }

        async fn capture_payment(
            &self,
            _reference: &ProviderReference,
        ) -> Result<CaptureResult, ProviderError> {
            Err(ProviderError::NotConfigured)
        }
    }

    #[test]
    fn test_resolve_uses_default_provider() {
        let registry = ProviderRegistry::new(ProviderKind::PayPal)
            .with(Arc::new(Fixed {
                kind: ProviderKind::Stripe,
                configured: true,
            }))
            .with(Arc::new(Fixed {
                kind: ProviderKind::PayPal,
                configured: false,
            }));

        assert_eq!(registry.resolve(None).unwrap().kind(), ProviderKind::PayPal);
        assert_eq!(
            registry.resolve(Some(ProviderKind::Stripe)).unwrap().kind(),
            ProviderKind::Stripe
        );
        assert_eq!(registry.configured(), vec![ProviderKind::Stripe]);
    }

    #[test]
    fn test_resolve_missing_provider() {
        let registry = ProviderRegistry::new(ProviderKind::Stripe);
        assert!(registry.resolve(None).is_none());
    }

    #[test]
    fn test_handle_serialization() {
        let handle = ProviderHandle::Redirect {
            reference: ProviderReference::new("cs_test_1"),
            url: "https://checkout.stripe.com/c/pay/cs_test_1".to_owned(),
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["type"], "redirect");
        assert_eq!(json["reference"], "cs_test_1");

        let handle = ProviderHandle::Approval {
            reference: ProviderReference::new("5O190127TN364715T"),
            approve_url: None,
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["type"], "approval");
        assert!(json.get("approveUrl").is_none());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
