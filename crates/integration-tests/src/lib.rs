//! Integration tests for CardsLawp.
//!
//! The tests drive the assembled storefront [`Router`] in process with
//! `tower::ServiceExt::oneshot`, carrying the session cookie between
//! requests like a browser would. Payments go to [`FakeProvider`], and
//! verification codes are returned in responses instead of being sent.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cardslawp-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt;

use cardslawp_core::{CurrencyCode, Email, ProviderKind, ProviderReference};
use cardslawp_storefront::app;
use cardslawp_storefront::config::StorefrontConfig;
use cardslawp_storefront::payments::{
    CaptureResult, CaptureStatus, PaymentProviderAdapter, PaymentRequest, ProviderError,
    ProviderHandle,
};
use cardslawp_storefront::state::AppState;

/// Email allowed to edit the catalog in tests.
pub const ADMIN_EMAIL: &str = "admin@cardslawp.test";

// =============================================================================
// Fake payment provider
// =============================================================================

/// In-memory stand-in for PayPal.
///
/// Captures report the amount the payment was created with, unless
/// [`FakeProvider::capture_amount`] overrides it, and complete unless
/// [`FakeProvider::capture_status`] says otherwise.
#[derive(Default)]
pub struct FakeProvider {
    unconfigured: bool,
    payments: Mutex<HashMap<String, u64>>,
    capture_override: Mutex<Option<u64>>,
    status_override: Mutex<Option<CaptureStatus>>,
    create_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl FakeProvider {
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Self::default()
        }
    }

    /// Make every capture report `amount` minor units.
    pub fn capture_amount(&self, amount: u64) {
        *self.capture_override.lock().unwrap() = Some(amount);
    }

    /// Make every capture report `status`.
    pub fn capture_status(&self, status: CaptureStatus) {
        *self.status_override.lock().unwrap() = Some(status);
    }

    /// Total the provider was asked to charge for `reference`.
    #[must_use]
    pub fn requested_total(&self, reference: &str) -> Option<u64> {
        self.payments.lock().unwrap().get(reference).copied()
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProviderAdapter for FakeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PayPal
    }

    fn is_configured(&self) -> bool {
        !self.unconfigured
    }

    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProviderHandle, ProviderError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("FAKE-{n}");
        self.payments
            .lock()
            .unwrap()
            .insert(reference.clone(), request.total.amount_minor_units);
        Ok(ProviderHandle::Approval {
            reference: ProviderReference::new(reference),
            approve_url: None,
        })
    }

    async fn capture_payment(
        &self,
        reference: &ProviderReference,
    ) -> Result<CaptureResult, ProviderError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let requested = self
            .requested_total(reference.as_str())
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                message: "RESOURCE_NOT_FOUND".to_string(),
            })?;
        let amount = self.capture_override.lock().unwrap().unwrap_or(requested);
        let status = self
            .status_override
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(CaptureStatus::Completed);
        Ok(CaptureResult {
            reference: reference.clone(),
            status,
            amount_minor_units: amount,
            currency: CurrencyCode::USD,
        })
    }
}

// =============================================================================
// Test application
// =============================================================================

/// A storefront wired to a [`FakeProvider`] with exposed verification codes.
pub struct TestApp {
    router: Router,
    pub provider: Arc<FakeProvider>,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        Self::with_provider(FakeProvider::default())
    }

    #[must_use]
    pub fn with_provider(provider: FakeProvider) -> Self {
        let mut config = StorefrontConfig::with_base_url("http://localhost:3000");
        config.admin_email = Some(Email::parse(ADMIN_EMAIL).unwrap());
        config.verification.expose_codes = true;
        config.checkout.default_provider = ProviderKind::PayPal;

        let provider = Arc::new(provider);
        let state = AppState::builder(config)
            .provider(Arc::clone(&provider) as Arc<dyn PaymentProviderAdapter>)
            .build()
            .unwrap();

        Self {
            router: app(state),
            provider,
        }
    }

    /// A new browser with its own cookie jar.
    #[must_use]
    pub fn browser(&self) -> Browser {
        Browser {
            router: self.router.clone(),
            cookie: Mutex::new(None),
        }
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Status, headers, and JSON body of a response. Non-JSON bodies become a
/// JSON string.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// The `error` kind of an error response.
    #[must_use]
    pub fn error_kind(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

/// One visitor: sends requests and keeps the session cookie.
pub struct Browser {
    router: Router,
    cookie: Mutex<Option<String>>,
}

impl Browser {
    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Start verification for `email` and submit the returned code.
    pub async fn verify_email(&self, email: &str) -> TestResponse {
        let issued = self
            .post("/api/session/login", serde_json::json!({ "email": email }))
            .await;
        assert_eq!(issued.status, StatusCode::OK, "login failed: {}", issued.body);
        let code = issued.body["code"].as_str().unwrap().to_string();
        self.post(
            "/api/session/verify-email",
            serde_json::json!({ "code": code }),
        )
        .await
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(cookie) = self.cookie.lock().unwrap().clone() {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        self.remember_cookie(response.headers());

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        TestResponse {
            status,
            headers,
            body,
        }
    }

    fn remember_cookie(&self, headers: &HeaderMap) {
        let Some(set_cookie) = headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let pair = set_cookie.split(';').next().unwrap_or_default().trim();
        let has_value = pair.split_once('=').is_some_and(|(_, v)| !v.is_empty());
        let removed = set_cookie.to_ascii_lowercase().contains("max-age=0");

        *self.cookie.lock().unwrap() = (has_value && !removed).then(|| pair.to_string());
    }
}
