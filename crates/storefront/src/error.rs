//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers return `Result<T, AppError>`.
//!
//! Responses are JSON: `{"error": "<Kind>", "message": "..."}`. The kind is
//! stable and meant for clients to branch on; the message is for humans.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use cardslawp_core::{CartError, PricingError};

use crate::db::RepositoryError;
use crate::services::{CheckoutError, VerificationError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout create or capture failed.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// Verification code issue or check failed.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Cart could not be priced.
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Cart mutation was rejected.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// Repository operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Email address or phone number did not parse.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Session lacks the required verified identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn pricing_kind(err: &PricingError) -> &'static str {
    match err {
        PricingError::UnknownProduct(_) => "UnknownProduct",
        PricingError::InvalidQuantity { .. } | PricingError::TotalOverflow => "InvalidQuantity",
        PricingError::CurrencyMismatch { .. } => "CurrencyMismatch",
    }
}

impl AppError {
    /// Stable error kind reported to clients.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Pricing(p) => pricing_kind(p),
                CheckoutError::EmptyCart => "EmptyCart",
                CheckoutError::ProviderUnavailable(_) => "ProviderUnavailable",
                CheckoutError::PaymentFailed(_) => "PaymentFailed",
                CheckoutError::AmountMismatch { .. } => "AmountMismatch",
                CheckoutError::UnknownCheckout(_) => "UnknownCheckout",
                CheckoutError::Repository(_) | CheckoutError::Order(_) => "Internal",
            },
            Self::Verification(err) => match err {
                VerificationError::InvalidCode => "InvalidCode",
                VerificationError::DeliveryUnavailable(_) => "DeliveryUnavailable",
                VerificationError::Delivery(_) => "DeliveryFailed",
                VerificationError::Repository(_) => "Internal",
            },
            Self::Pricing(err) => pricing_kind(err),
            Self::Cart(_) => "InvalidQuantity",
            Self::InvalidIdentifier(_) => "InvalidIdentifier",
            Self::Unauthorized(_) => "Unauthorized",
            Self::BadRequest(_) => "BadRequest",
            Self::Database(_) | Self::Internal(_) => "Internal",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.kind() {
            "UnknownProduct" | "InvalidQuantity" | "CurrencyMismatch" | "EmptyCart"
            | "InvalidCode" | "InvalidIdentifier" | "BadRequest" => StatusCode::BAD_REQUEST,
            "ProviderUnavailable" | "DeliveryUnavailable" => StatusCode::SERVICE_UNAVAILABLE,
            "DeliveryFailed" => StatusCode::BAD_GATEWAY,
            "PaymentFailed" => StatusCode::PAYMENT_REQUIRED,
            "AmountMismatch" => StatusCode::CONFLICT,
            "UnknownCheckout" => StatusCode::NOT_FOUND,
            "Unauthorized" => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Server-side details stay in the logs.
    fn public_message(&self) -> String {
        match self.kind() {
            "Internal" => "Internal server error".to_string(),
            "ProviderUnavailable" => "Payment provider is unavailable, please try again".to_string(),
            "DeliveryFailed" => "Could not deliver the verification code".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context.
///
/// Call this after a successful verification to associate errors with the
/// visitor. Pass a masked identifier, never the raw address.
pub fn set_sentry_user(user_id: &impl ToString) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the visitor.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for visitor actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("checkout", "Checkout created", Some(&[("provider", "stripe")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
