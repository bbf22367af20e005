//! Cart route handlers.
//!
//! The cart lives in the visitor session. Every mutation runs under the
//! session lock and answers with the freshly priced cart, so the client
//! always shows totals computed from the catalog.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cardslawp_core::{Cart, CartError, PricedCart, PricingError, ProductId, price};

use crate::error::Result;
use crate::middleware::Visitor;
use crate::state::AppState;

/// Priced cart as returned by every cart endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    #[serde(flatten)]
    pub priced: PricedCart,
    pub item_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCart {
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCart {
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFromCart {
    pub product_id: ProductId,
}

// =============================================================================
// Helpers
// =============================================================================

/// Price `cart` against the current catalog.
pub(crate) async fn cart_view(state: &AppState, cart: &Cart) -> Result<CartView> {
    let ids: Vec<ProductId> = cart.lines().iter().map(|l| l.product_id.clone()).collect();
    let catalog = state.products().snapshot(&ids).await?;
    let priced = price(cart, &catalog, state.config().currency)?;
    Ok(CartView {
        priced,
        item_count: cart.total_quantity(),
    })
}

async fn ensure_listed(state: &AppState, product_id: &ProductId) -> Result<()> {
    if state.products().get(product_id).await?.is_none() {
        return Err(PricingError::UnknownProduct(product_id.clone()).into());
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

/// Show the priced cart.
#[instrument(skip(state, visitor))]
pub async fn show(State(state): State<AppState>, visitor: Visitor) -> Result<Json<CartView>> {
    let session = state.sessions().load(&visitor.0).await?;
    Ok(Json(cart_view(&state, &session.cart).await?))
}

/// Add a product. Quantity defaults to 1 and adds to any existing line.
#[instrument(skip(state, visitor), fields(product_id = %form.product_id))]
pub async fn add(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<AddToCart>,
) -> Result<Json<CartView>> {
    ensure_listed(&state, &form.product_id).await?;

    let raw = form.quantity.unwrap_or(1);
    let quantity = u32::try_from(raw)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| CartError::InvalidQuantity {
            product_id: form.product_id.clone(),
            quantity: raw,
        })?;

    let mut session = state.sessions().lock(&visitor.0).await?;
    session.cart.add(form.product_id, quantity)?;
    let view = cart_view(&state, &session.cart).await?;
    session.save().await?;

    tracing::debug!(items = view.item_count, "Added to cart");
    Ok(Json(view))
}

/// Set a line's quantity. Zero removes the line.
#[instrument(skip(state, visitor), fields(product_id = %form.product_id))]
pub async fn update(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<UpdateCart>,
) -> Result<Json<CartView>> {
    if form.quantity != 0 {
        ensure_listed(&state, &form.product_id).await?;
    }

    let mut session = state.sessions().lock(&visitor.0).await?;
    session.cart.set_quantity(form.product_id, form.quantity)?;
    let view = cart_view(&state, &session.cart).await?;
    session.save().await?;

    Ok(Json(view))
}

/// Remove a product's line. Removing an absent product is not an error.
#[instrument(skip(state, visitor), fields(product_id = %form.product_id))]
pub async fn remove(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<RemoveFromCart>,
) -> Result<Json<CartView>> {
    let mut session = state.sessions().lock(&visitor.0).await?;
    session.cart.remove(&form.product_id);
    let view = cart_view(&state, &session.cart).await?;
    session.save().await?;

    Ok(Json(view))
}

/// Empty the cart.
#[instrument(skip(state, visitor))]
pub async fn clear(State(state): State<AppState>, visitor: Visitor) -> Result<Json<CartView>> {
    let mut session = state.sessions().lock(&visitor.0).await?;
    session.cart.clear();
    session.save().await?;

    cart_view(&state, &session.cart).await.map(Json)
}
