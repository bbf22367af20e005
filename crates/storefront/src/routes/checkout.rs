//! Checkout route handlers.
//!
//! ```text
//! POST /api/checkout/create    price the cart, open a provider payment
//! POST /api/checkout/capture   confirm payment, record the order
//! GET  /api/checkout/return    provider redirect back, confirmed server side
//! GET  /api/checkout/cancel    provider cancel redirect
//! ```
//!
//! The session is only written back when the service call succeeds, so a
//! failed create leaves the cart as it was and a failed capture keeps it for
//! a retry.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cardslawp_core::{CartLineInput, Order, ProviderKind, ProviderReference};

use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::Visitor;
use crate::services::{CheckoutCreated, CreateCheckout};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateBody {
    /// Replaces the session cart when present.
    #[serde(default)]
    pub cart: Option<Vec<CartLineInput>>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureBody {
    pub provider_reference: ProviderReference,
}

/// Query of the provider redirect back to us.
///
/// Stripe fills in `reference` from the success URL template; PayPal appends
/// its order id as `token`.
#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub reference: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: Order,
}

#[derive(Debug, Serialize)]
pub struct Cancelled {
    pub cancelled: bool,
}

async fn capture_for(
    state: &AppState,
    visitor: &Visitor,
    reference: &ProviderReference,
) -> Result<Json<OrderResponse>> {
    let mut session = state.sessions().lock(&visitor.0).await?;
    let order = state.checkout().capture(&mut session, reference).await?;
    session.save().await?;

    let order_id = order.id.to_string();
    add_breadcrumb(
        "checkout",
        "Order captured",
        Some(&[("order_id", order_id.as_str())]),
    );
    Ok(Json(OrderResponse { order }))
}

/// Start a checkout with the chosen (or default) provider.
#[instrument(skip(state, visitor, body))]
pub async fn create(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(body): Json<CreateBody>,
) -> Result<Json<CheckoutCreated>> {
    let mut session = state.sessions().lock(&visitor.0).await?;
    let created = state
        .checkout()
        .create(
            &mut session,
            CreateCheckout {
                cart: body.cart,
                provider: body.provider,
            },
        )
        .await?;
    session.save().await?;

    add_breadcrumb(
        "checkout",
        "Checkout created",
        Some(&[("provider", created.provider.as_str())]),
    );
    Ok(Json(created))
}

/// Confirm a payment the client completed with the provider.
#[instrument(skip(state, visitor, body), fields(reference = %body.provider_reference))]
pub async fn capture(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(body): Json<CaptureBody>,
) -> Result<Json<OrderResponse>> {
    capture_for(&state, &visitor, &body.provider_reference).await
}

/// Provider redirect after payment.
///
/// Query parameters only say which checkout to look at; the outcome always
/// comes from the provider.
#[instrument(skip(state, visitor))]
pub async fn return_from_provider(
    State(state): State<AppState>,
    visitor: Visitor,
    Query(query): Query<ReturnQuery>,
) -> Result<Json<OrderResponse>> {
    let reference = query
        .reference
        .or(query.token)
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("missing checkout reference".to_string()))?;

    capture_for(&state, &visitor, &ProviderReference::new(reference)).await
}

/// Provider redirect when the buyer gives up. The cart is left untouched.
#[instrument]
pub async fn cancel() -> Json<Cancelled> {
    tracing::info!("Checkout cancelled by buyer");
    Json(Cancelled { cancelled: true })
}
