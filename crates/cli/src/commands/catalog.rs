//! Catalog file checks.
//!
//! # Usage
//!
//! ```bash
//! cardslawp-cli catalog check catalog.json
//! cardslawp-cli catalog check catalog.json --currency EUR
//! ```
//!
//! Parses the file the way the storefront does at startup and validates it
//! (unique ids, one currency), so a bad catalog is caught before deploy.

use std::path::Path;

use cardslawp_core::CurrencyCode;
use cardslawp_storefront::db::products::{CatalogError, load_catalog, validate_catalog};

/// Summary of a valid catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSummary {
    pub products: usize,
    /// Cheapest and dearest unit price in minor units.
    pub price_range: Option<(u64, u64)>,
}

/// Load and validate the catalog at `path`.
///
/// # Errors
///
/// Returns `CatalogError` if the file cannot be read, does not parse, has
/// duplicate ids, or mixes currencies.
pub fn check(path: &Path, currency: CurrencyCode) -> Result<CatalogSummary, CatalogError> {
    let products = load_catalog(Some(path))?;
    validate_catalog(&products, currency)?;

    let prices = products.iter().map(|p| p.unit_price_minor_units);
    let price_range = prices.clone().min().zip(prices.max());

    tracing::info!(
        path = %path.display(),
        products = products.len(),
        %currency,
        "Catalog is valid"
    );

    Ok(CatalogSummary {
        products: products.len(),
        price_range,
    })
}
