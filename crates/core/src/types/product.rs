//! Catalog product.

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::money::{CurrencyCode, Money};

/// A gift card product as listed in the catalog.
///
/// Products are immutable once created; the catalog owns them and pricing
/// always reads the unit price from here, never from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price in the currency's minor units (cents).
    pub unit_price_minor_units: u64,
    pub currency: CurrencyCode,
    /// Image path or URL shown next to the product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl Product {
    /// The unit price as [`Money`].
    #[must_use]
    pub const fn unit_price(&self) -> Money {
        Money::from_minor(self.unit_price_minor_units, self.currency)
    }
}
