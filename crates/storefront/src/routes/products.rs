//! Catalog route handlers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use cardslawp_core::{CurrencyCode, Product, ProductId, VisitorSession};

use crate::db::RepositoryError;
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::Visitor;
use crate::state::AppState;

/// Body of `POST /api/products`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    /// Generated from the name when absent.
    #[serde(default)]
    pub id: Option<ProductId>,
    pub name: String,
    pub unit_price_minor_units: u64,
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Whether the session holds the verified admin email.
pub(crate) fn is_admin(state: &AppState, session: &VisitorSession) -> bool {
    state
        .config()
        .admin_email
        .as_ref()
        .is_some_and(|admin| session.verified_email() == Some(admin))
}

/// `amazon-gift-card-7f3a9c1e` from `Amazon Gift Card`.
fn generate_id(name: &str) -> ProductId {
    let slug = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    if slug.is_empty() {
        ProductId::new(suffix)
    } else {
        ProductId::new(format!("{slug}-{suffix}"))
    }
}

/// List the catalog.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.products().list().await?))
}

/// Add a product to the catalog. Admin only.
#[instrument(skip(state, visitor, form))]
pub async fn create(
    State(state): State<AppState>,
    visitor: Visitor,
    Json(form): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    let session = state.sessions().load(&visitor.0).await?;
    if !is_admin(&state, &session) {
        tracing::warn!("Catalog change attempted without admin verification");
        return Err(AppError::Unauthorized(
            "a verified admin email is required".to_string(),
        ));
    }

    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("product name is required".to_string()));
    }
    if form.unit_price_minor_units == 0 {
        return Err(AppError::BadRequest(
            "unit price must be positive".to_string(),
        ));
    }

    let store_currency = state.config().currency;
    let currency = form.currency.unwrap_or(store_currency);
    if currency != store_currency {
        return Err(AppError::BadRequest(format!(
            "products must be priced in {store_currency}"
        )));
    }

    let product = Product {
        id: form.id.unwrap_or_else(|| generate_id(name)),
        name: name.to_string(),
        unit_price_minor_units: form.unit_price_minor_units,
        currency,
        image_ref: form.image_ref,
    };

    match state.products().insert(product.clone()).await {
        Ok(()) => {}
        Err(RepositoryError::Conflict(_)) => {
            return Err(AppError::BadRequest(format!(
                "product {} already exists",
                product.id
            )));
        }
        Err(e) => return Err(e.into()),
    }

    add_breadcrumb(
        "catalog",
        "Product created",
        Some(&[("product_id", product.id.as_str())]),
    );
    tracing::info!(product_id = %product.id, "Product created");

    Ok((StatusCode::CREATED, Json(product)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_slugs_name() {
        let id = generate_id("Amazon Gift Card!");
        assert!(id.as_str().starts_with("amazon-gift-card-"));
        assert_eq!(id.as_str().len(), "amazon-gift-card-".len() + 8);
    }

    #[test]
    fn test_generate_id_without_usable_name() {
        assert_eq!(generate_id("!!!").as_str().len(), 8);
    }
}
