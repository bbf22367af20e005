//! PayPal Orders v2 adapter (approval flow).
//!
//! Create makes an order with `intent=CAPTURE`; the buyer approves it with
//! the PayPal JS SDK and the client asks us to capture. Capture is retried
//! safely: `ORDER_ALREADY_CAPTURED` falls back to reading the order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cardslawp_core::{CurrencyCode, Money, ProviderKind, ProviderReference};

use super::{
    CaptureResult, CaptureStatus, MAX_LOGGED_BODY, PaymentProviderAdapter, PaymentRequest,
    ProviderError, ProviderHandle, api_error, truncate,
};
use crate::config::PayPalConfig;

/// Refresh tokens this long before PayPal says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

// =============================================================================
// Access token cache
// =============================================================================

#[derive(Clone)]
struct AccessToken {
    value: Arc<str>,
    lifetime: Duration,
}

/// Expire each cached token after its own `expires_in`, minus the margin.
struct TokenExpiry;

impl Expiry<(), AccessToken> for TokenExpiry {
    fn expire_after_create(
        &self,
        _key: &(),
        value: &AccessToken,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct Amount {
    currency_code: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct AmountWithBreakdown {
    currency_code: &'static str,
    value: String,
    breakdown: Breakdown,
}

#[derive(Debug, Serialize)]
struct Breakdown {
    item_total: Amount,
}

#[derive(Debug, Serialize)]
struct Item {
    name: String,
    quantity: String,
    unit_amount: Amount,
    category: &'static str,
}

#[derive(Debug, Serialize)]
struct PurchaseUnitRequest {
    reference_id: String,
    amount: AmountWithBreakdown,
    items: Vec<Item>,
}

#[derive(Debug, Serialize)]
struct ApplicationContext {
    return_url: String,
    cancel_url: String,
    brand_name: &'static str,
    shipping_preference: &'static str,
    user_action: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateOrder {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnitRequest>,
    application_context: ApplicationContext,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct MoneyValue {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Capture {
    status: String,
    amount: Option<MoneyValue>,
}

#[derive(Debug, Default, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    amount: Option<MoneyValue>,
    #[serde(default)]
    payments: Payments,
}

#[derive(Debug, Deserialize)]
struct PayPalOrder {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    issue: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

/// The first `issue` code in a PayPal error body.
fn error_issue(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()?
        .details
        .into_iter()
        .next()
        .map(|d| d.issue)
}

fn decimal(money: Money) -> Result<String, ProviderError> {
    money
        .to_decimal_string()
        .map_err(|e| ProviderError::Protocol(e.to_string()))
}

fn create_order_body(request: &PaymentRequest) -> Result<CreateOrder, ProviderError> {
    let currency = request.total.currency;
    let total = decimal(request.total)?;

    let items = request
        .lines
        .iter()
        .map(|line| {
            Ok(Item {
                name: line.name.clone(),
                quantity: line.quantity.to_string(),
                unit_amount: Amount {
                    currency_code: currency.code(),
                    value: decimal(Money::from_minor(line.unit_price_minor_units, currency))?,
                },
                category: "DIGITAL_GOODS",
            })
        })
        .collect::<Result<Vec<_>, ProviderError>>()?;

    Ok(CreateOrder {
        intent: "CAPTURE",
        purchase_units: vec![PurchaseUnitRequest {
            reference_id: request.checkout_id.clone(),
            amount: AmountWithBreakdown {
                currency_code: currency.code(),
                value: total.clone(),
                breakdown: Breakdown {
                    item_total: Amount {
                        currency_code: currency.code(),
                        value: total,
                    },
                },
            },
            items,
        }],
        application_context: ApplicationContext {
            return_url: request.return_url.clone(),
            cancel_url: request.cancel_url.clone(),
            brand_name: "CardsLawp",
            shipping_preference: "NO_SHIPPING",
            user_action: "PAY_NOW",
        },
    })
}

/// Sum the completed captures of an order.
fn capture_from_order(order: PayPalOrder) -> Result<CaptureResult, ProviderError> {
    let reference = ProviderReference::new(order.id);
    let captures: Vec<&Capture> = order
        .purchase_units
        .iter()
        .flat_map(|unit| unit.payments.captures.iter())
        .collect();

    let mut collected: Option<Money> = None;
    for capture in captures.iter().filter(|c| c.status == "COMPLETED") {
        let amount = capture
            .amount
            .as_ref()
            .ok_or_else(|| ProviderError::Protocol("completed capture without amount".to_owned()))?;
        let currency: CurrencyCode = amount
            .currency_code
            .parse()
            .map_err(|e: cardslawp_core::MoneyError| ProviderError::Protocol(e.to_string()))?;
        let money = Money::parse_decimal(&amount.value, currency)
            .map_err(|e| ProviderError::Protocol(e.to_string()))?;
        collected = Some(match collected {
            None => money,
            Some(sum) => sum.checked_add(money).ok_or_else(|| {
                ProviderError::Protocol("captures in different currencies".to_owned())
            })?,
        });
    }

    if let Some(total) = collected {
        return Ok(CaptureResult {
            reference,
            status: CaptureStatus::Completed,
            amount_minor_units: total.amount_minor_units,
            currency: total.currency,
        });
    }

    if order.status == "COMPLETED" {
        return Err(ProviderError::Protocol(
            "order completed without a completed capture".to_owned(),
        ));
    }

    let currency = order
        .purchase_units
        .iter()
        .find_map(|unit| unit.amount.as_ref())
        .and_then(|amount| amount.currency_code.parse().ok())
        .unwrap_or_default();

    let status = if captures
        .iter()
        .any(|c| matches!(c.status.as_str(), "DECLINED" | "FAILED"))
    {
        CaptureStatus::Declined("capture declined".to_owned())
    } else if order.status == "VOIDED" {
        CaptureStatus::Declined("order voided".to_owned())
    } else {
        CaptureStatus::Pending
    };

    Ok(CaptureResult {
        reference,
        status,
        amount_minor_units: 0,
        currency,
    })
}

// =============================================================================
// Adapter
// =============================================================================

#[derive(Clone)]
pub struct PayPalAdapter {
    client: reqwest::Client,
    config: Option<PayPalConfig>,
    tokens: Cache<(), AccessToken>,
}

impl PayPalAdapter {
    /// Create the adapter. Without a config it reports itself unconfigured.
    #[must_use]
    pub fn new(client: reqwest::Client, config: Option<PayPalConfig>) -> Self {
        let tokens = Cache::builder()
            .max_capacity(1)
            .expire_after(TokenExpiry)
            .build();
        Self {
            client,
            config,
            tokens,
        }
    }

    fn config(&self) -> Result<&PayPalConfig, ProviderError> {
        self.config.as_ref().ok_or(ProviderError::NotConfigured)
    }

    fn url(config: &PayPalConfig, path: &str) -> String {
        format!("{}{path}", config.mode.api_base())
    }

    /// A cached OAuth2 access token, fetched on first use and after expiry.
    async fn access_token(&self) -> Result<Arc<str>, ProviderError> {
        let config = self.config()?;
        let token = self
            .tokens
            .try_get_with((), self.fetch_token(config))
            .await
            .map_err(|e: Arc<ProviderError>| (*e).clone())?;
        Ok(token.value)
    }

    async fn fetch_token(&self, config: &PayPalConfig) -> Result<AccessToken, ProviderError> {
        let response = self
            .client
            .post(Self::url(config, "/v1/oauth2/token"))
            .basic_auth(&config.client_id, Some(config.client_secret.expose_secret()))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderKind::PayPal, response).await);
        }

        let token: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = token.expires_in, "PayPal access token refreshed");

        Ok(AccessToken {
            value: Arc::from(token.access_token),
            lifetime: Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN),
        })
    }

    async fn get_order(&self, reference: &ProviderReference) -> Result<PayPalOrder, ProviderError> {
        let config = self.config()?;
        let token = self.access_token().await?;

        let response = self
            .client
            .get(Self::url(
                config,
                &format!("/v2/checkout/orders/{}", reference.as_str()),
            ))
            .bearer_auth(&*token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderKind::PayPal, response).await);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PaymentProviderAdapter for PayPalAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PayPal
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
        let body = create_order_body(request)?;
        let token = self.access_token().await?;

        let response = self
            .client
            .post(Self::url(config, "/v2/checkout/orders"))
            .bearer_auth(&*token)
            .header("PayPal-Request-Id", &request.checkout_id)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(ProviderKind::PayPal, response).await);
        }

        let order: PayPalOrder = response.json().await?;
        let approve_url = order
            .links
            .iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href.clone());

        tracing::info!(reference = %order.id, status = %order.status, "PayPal order created");

        Ok(ProviderHandle::Approval {
            reference: ProviderReference::new(order.id),
            approve_url,
        })
    }

    #[instrument(skip(self), fields(reference = %reference))]
    async fn capture_payment(
        &self,
        reference: &ProviderReference,
    ) -> Result<CaptureResult, ProviderError> {
        let config = self.config()?;
        let token = self.access_token().await?;

        let response = self
            .client
            .post(Self::url(
                config,
                &format!("/v2/checkout/orders/{}/capture", reference.as_str()),
            ))
            .bearer_auth(&*token)
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let order: PayPalOrder = response.json().await?;
            return capture_from_order(order);
        }
        if status.is_server_error() {
            return Err(api_error(ProviderKind::PayPal, response).await);
        }

        let body = response.text().await.unwrap_or_default();
        match error_issue(&body).as_deref() {
            Some("ORDER_ALREADY_CAPTURED") => {
                tracing::info!("PayPal order already captured, reading order");
                capture_from_order(self.get_order(reference).await?)
            }
            Some(issue @ ("INSTRUMENT_DECLINED" | "PAYER_ACTION_REQUIRED")) => {
                Err(ProviderError::Declined(issue.to_owned()))
            }
            _ => {
                tracing::error!(
                    status = status.as_u16(),
                    body = %truncate(&body, MAX_LOGGED_BODY),
                    "PayPal capture failed"
                );
                Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: truncate(&body, MAX_LOGGED_BODY).to_owned(),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cardslawp_core::{PricedLineItem, ProductId};

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

    #[test]
    fn test_order_body_renders_decimal_amounts() {
        let body = serde_json::to_value(create_order_body(&request()).unwrap()).unwrap();
        assert_eq!(body["intent"], "CAPTURE");
        let unit = &body["purchase_units"][0];
        assert_eq!(unit["amount"]["value"], "50.00");
        assert_eq!(unit["amount"]["currency_code"], "USD");
        assert_eq!(unit["amount"]["breakdown"]["item_total"]["value"], "50.00");
        assert_eq!(unit["items"][0]["unit_amount"]["value"], "25.00");
        assert_eq!(unit["items"][0]["quantity"], "2");
    }

    #[test]
    fn test_completed_captures_are_summed() {
        let order: PayPalOrder = serde_json::from_value(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": { "captures": [
                    { "status": "COMPLETED", "amount": { "currency_code": "USD", "value": "30.00" } },
                    { "status": "COMPLETED", "amount": { "currency_code": "USD", "value": "20.00" } }
                ]}
            }]
        }))
        .unwrap();

        let result = capture_from_order(order).unwrap();
        assert_eq!(result.status, CaptureStatus::Completed);
        assert_eq!(result.amount_minor_units, 5000);
        assert_eq!(result.reference.as_str(), "5O190127TN364715T");
    }

    #[test]
    fn test_approved_order_without_captures_is_pending() {
        let order: PayPalOrder = serde_json::from_value(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "APPROVED",
            "purchase_units": [{ "amount": { "currency_code": "USD", "value": "50.00" } }]
        }))
        .unwrap();

        let result = capture_from_order(order).unwrap();
        assert_eq!(result.status, CaptureStatus::Pending);
        assert_eq!(result.amount_minor_units, 0);
    }

    #[test]
    fn test_declined_capture() {
        let order: PayPalOrder = serde_json::from_value(serde_json::json!({
            "id": "5O190127TN364715T",
            "status": "PAYER_ACTION_REQUIRED",
            "purchase_units": [{
                "payments": { "captures": [
                    { "status": "DECLINED", "amount": { "currency_code": "USD", "value": "50.00" } }
                ]}
            }]
        }))
        .unwrap();

        assert!(matches!(
            capture_from_order(order).unwrap().status,
            CaptureStatus::Declined(_)
        ));
    }

    #[test]
    fn test_error_issue() {
        let body = r#"{"name":"UNPROCESSABLE_ENTITY","details":[{"issue":"ORDER_ALREADY_CAPTURED","description":"Order already captured."}]}"#;
        assert_eq!(error_issue(body).as_deref(), Some("ORDER_ALREADY_CAPTURED"));
        assert_eq!(error_issue("not json"), None);
    }

    #[tokio::test]
    async fn test_unconfigured_adapter_refuses_without_network() {
        let adapter = PayPalAdapter::new(reqwest::Client::new(), None);
        assert!(!adapter.is_configured());
        assert!(matches!(
            adapter
                .capture_payment(&ProviderReference::new("5O190127TN364715T"))
                .await,
            Err(ProviderError::NotConfigured)
        ));
    }
}
