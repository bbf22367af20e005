//! Stripe Checkout adapter (redirect flow).
//!
//! Create makes a hosted Checkout Session and hands back its URL. Stripe
//! sends the buyer to our return URL with the session id substituted for
//! `{CHECKOUT_SESSION_ID}`; confirmation then retrieves the session
//! server-side, so a forged return never counts as payment.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;

use cardslawp_core::{CurrencyCode, ProviderKind, ProviderReference};

use super::{
    CaptureResult, CaptureStatus, PaymentProviderAdapter, PaymentRequest, ProviderError,
    ProviderHandle, api_error,
};
use crate::config::StripeConfig;

#[derive(Clone)]
pub struct StripeAdapter {
    client: reqwest::Client,
    config: Option<StripeConfig>,
}

impl StripeAdapter {
    /// Create the adapter. Without a config it reports itself unconfigured.
    #[must_use]
    pub fn new(client: reqwest::Client, config: Option<StripeConfig>) -> Self {
        Self { client, config }
    }

    fn config(&self) -> Result<&StripeConfig, ProviderError> {
        self.config.as_ref().ok_or(ProviderError::NotConfigured)
    }
}

/// The fields we read from a Checkout Session.
#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
    /// `open`, `complete` or `expired`.
    status: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
}

/// Form body for `POST /v1/checkout/sessions`.
fn checkout_form(request: &PaymentRequest) -> Vec<(String, String)> {
    let currency = request.total.currency.code().to_ascii_lowercase();
    let separator = if request.return_url.contains('?') { '&' } else { '?' };

    let mut form = vec![
        ("mode".to_owned(), "payment".to_owned()),
        ("client_reference_id".to_owned(), request.checkout_id.clone()),
        (
            "success_url".to_owned(),
            format!(
                "{}{separator}reference={{CHECKOUT_SESSION_ID}}",
                request.return_url
            ),
        ),
        ("cancel_url".to_owned(), request.cancel_url.clone()),
    ];

    for (i, line) in request.lines.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((format!("{prefix}[price_data][currency]"), currency.clone()));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            line.name.clone(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            line.unit_price_minor_units.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
    }

    form
}

/// Interpret a retrieved session.
fn capture_from_session(session: CheckoutSession) -> Result<CaptureResult, ProviderError> {
    let reference = ProviderReference::new(session.id);

    let status = match (session.payment_status.as_deref(), session.status.as_deref()) {
        (Some("paid"), _) => CaptureStatus::Completed,
        (_, Some("expired")) => CaptureStatus::Declined("checkout session expired".to_owned()),
        _ => CaptureStatus::Pending,
    };

    let amount_minor_units = match session.amount_total {
        Some(amount) => u64::try_from(amount)
            .map_err(|_| ProviderError::Protocol(format!("negative amount_total {amount}")))?,
        None if status == CaptureStatus::Completed => {
            return Err(ProviderError::Protocol(
                "paid session without amount_total".to_owned(),
            ));
        }
        None => 0,
    };

    let currency = session
        .currency
        .as_deref()
        .ok_or_else(|| ProviderError::Protocol("session without currency".to_owned()))?
        .parse::<CurrencyCode>()
        .map_err(|e| ProviderError::Protocol(e.to_string()))?;

    Ok(CaptureResult {
        reference,
        status,
        amount_minor_units,
        currency,
    })
}

#[async_trait]
impl PaymentProviderAdapter for StripeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id, total_minor = request.total.amount_minor_units))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderHandle, ProviderError> {
        let config = self.config()?;

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", config.api_base))
            .bearer_auth(config.secret_key.expose_secret())
            .form(&checkout_form(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderKind::Stripe, response).await);
        }

        let session: CheckoutSession = response.json().await?;
        let url = session
            .url
            .ok_or_else(|| ProviderError::Protocol("checkout session without url".to_owned()))?;

        tracing::info!(reference = %session.id, "Stripe checkout session created");

        Ok(ProviderHandle::Redirect {
            reference: ProviderReference::new(session.id),
            url,
        })
    }

    #[instrument(skip(self), fields(reference = %reference))]
    async fn capture_payment(
        &self,
        reference: &ProviderReference,
    ) -> Result<CaptureResult, ProviderError> {
        let config = self.config()?;

        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                config.api_base,
                reference.as_str()
            ))
            .bearer_auth(config.secret_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderKind::Stripe, response).await);
        }

        let session: CheckoutSession = response.json().await?;
        if session.id != reference.as_str() {
            return Err(ProviderError::Protocol(format!(
                "requested session {reference}, got {}",
                session.id
            )));
        }

        capture_from_session(session)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cardslawp_core::{Money, PricedLineItem, ProductId};

    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            checkout_id: "chk-1".to_owned(),
            lines: vec![PricedLineItem {
                product_id: ProductId::new("amazon-25"),
                name: "Amazon Gift Card $25".to_owned(),
                unit_price_minor_units: 2500,
                quantity: 2,
                line_total_minor_units: 5000,
            }],
            total: Money::from_minor(5000, CurrencyCode::USD),
            return_url: "https://cardslawp.com/api/checkout/return".to_owned(),
            cancel_url: "https://cardslawp.com/api/checkout/cancel".to_owned(),
        }
    }

    fn field<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_checkout_form_prices_lines_in_minor_units() {
        let form = checkout_form(&request());
        assert_eq!(field(&form, "mode"), Some("payment"));
        assert_eq!(field(&form, "client_reference_id"), Some("chk-1"));
        assert_eq!(field(&form, "line_items[0][price_data][currency]"), Some("usd"));
        assert_eq!(field(&form, "line_items[0][price_data][unit_amount]"), Some("2500"));
        assert_eq!(field(&form, "line_items[0][quantity]"), Some("2"));
        assert_eq!(
            field(&form, "success_url"),
            Some("https://cardslawp.com/api/checkout/return?reference={CHECKOUT_SESSION_ID}")
        );
    }

    #[test]
    fn test_paid_session_is_completed() {
        let session = CheckoutSession {
            id: "cs_test_1".to_owned(),
            url: None,
            status: Some("complete".to_owned()),
            payment_status: Some("paid".to_owned()),
            amount_total: Some(5000),
            currency: Some("usd".to_owned()),
        };
        let result = capture_from_session(session).unwrap();
        assert_eq!(result.status, CaptureStatus::Completed);
        assert_eq!(result.amount_minor_units, 5000);
        assert_eq!(result.currency, CurrencyCode::USD);
    }

    #[test]
    fn test_unpaid_session_is_pending() {
        let session = CheckoutSession {
            id: "cs_test_1".to_owned(),
            url: Some("https://checkout.stripe.com/c/pay/cs_test_1".to_owned()),
            status: Some("open".to_owned()),
            payment_status: Some("unpaid".to_owned()),
            amount_total: Some(5000),
            currency: Some("usd".to_owned()),
        };
        assert_eq!(
            capture_from_session(session).unwrap().status,
            CaptureStatus::Pending
        );
    }

    #[test]
    fn test_expired_session_is_declined() {
        let session = CheckoutSession {
            id: "cs_test_1".to_owned(),
            url: None,
            status: Some("expired".to_owned()),
            payment_status: Some("unpaid".to_owned()),
            amount_total: Some(5000),
            currency: Some("usd".to_owned()),
        };
        assert!(matches!(
            capture_from_session(session).unwrap().status,
            CaptureStatus::Declined(_)
        ));
    }

    #[test]
    fn test_paid_session_without_amount_is_protocol_error() {
        let session = CheckoutSession {
            id: "cs_test_1".to_owned(),
            url: None,
            status: Some("complete".to_owned()),
            payment_status: Some("paid".to_owned()),
            amount_total: None,
            currency: Some("usd".to_owned()),
        };
        assert!(matches!(
            capture_from_session(session),
            Err(ProviderError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_adapter_refuses_without_network() {
        let adapter = StripeAdapter::new(reqwest::Client::new(), None);
        assert!(!adapter.is_configured());
        assert!(matches!(
            adapter.create_payment(&request()).await,
            Err(ProviderError::NotConfigured)
        ));
    }
}
