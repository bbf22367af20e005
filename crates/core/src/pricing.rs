//! Cart pricing.
//!
//! Pricing turns a cart into priced line items and a total, reading unit
//! prices only from the catalog. All arithmetic is checked integer math in
//! minor currency units, so the total shown to the buyer is exactly the
//! amount handed to any payment provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Cart, CartError, CurrencyCode, Money, Product, ProductId};

/// Errors from pricing a cart.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// A line references a product the catalog does not have.
    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),

    /// A line quantity is zero, negative, or out of range.
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: i64,
    },

    /// A product is priced in a currency other than the store's.
    #[error("product {product_id} is priced in {found}, store currency is {expected}")]
    CurrencyMismatch {
        product_id: ProductId,
        expected: CurrencyCode,
        found: CurrencyCode,
    },

    /// A line or cart total does not fit in `u64` minor units.
    #[error("cart total overflows")]
    TotalOverflow,
}

impl From<CartError> for PricingError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::InvalidQuantity {
                product_id,
                quantity,
            } => Self::InvalidQuantity {
                product_id,
                quantity,
            },
        }
    }
}

/// Read access to catalog products by id.
pub trait CatalogLookup {
    fn product(&self, id: &ProductId) -> Option<&Product>;
}

impl CatalogLookup for HashMap<ProductId, Product> {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.get(id)
    }
}

impl CatalogLookup for [Product] {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.iter().find(|p| &p.id == id)
    }
}

impl CatalogLookup for Vec<Product> {
    fn product(&self, id: &ProductId) -> Option<&Product> {
        self.as_slice().product(id)
    }
}

/// A cart line with its catalog price applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLineItem {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price_minor_units: u64,
    pub quantity: u32,
    pub line_total_minor_units: u64,
}

/// The result of pricing a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedCart {
    pub lines: Vec<PricedLineItem>,
    pub total_minor_units: u64,
    pub currency: CurrencyCode,
}

impl PricedCart {
    #[must_use]
    pub const fn total(&self) -> Money {
        Money::from_minor(self.total_minor_units, self.currency)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Whether the total equals the sum of the line totals.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        sum_lines(&self.lines) == Some(self.total_minor_units)
    }
}

pub(crate) fn sum_lines(lines: &[PricedLineItem]) -> Option<u64> {
    lines
        .iter()
        .try_fold(0_u64, |acc, l| acc.checked_add(l.line_total_minor_units))
}

/// Price a cart against the catalog.
///
/// The operation is atomic: any unknown product or bad currency fails the
/// whole call and no line items are returned.
///
/// # Errors
///
/// Returns [`PricingError::UnknownProduct`], [`PricingError::CurrencyMismatch`]
/// or [`PricingError::TotalOverflow`].
pub fn price<C>(cart: &Cart, catalog: &C, currency: CurrencyCode) -> Result<PricedCart, PricingError>
where
    C: CatalogLookup + ?Sized,
{
    let mut lines = Vec::with_capacity(cart.lines().len());
    let mut total: u64 = 0;

    for line in cart.lines() {
        let product = catalog
            .product(&line.product_id)
            .ok_or_else(|| PricingError::UnknownProduct(line.product_id.clone()))?;

        if product.currency != currency {
            return Err(PricingError::CurrencyMismatch {
                product_id: product.id.clone(),
                expected: currency,
                found: product.currency,
            });
        }

        let line_total = product
            .unit_price_minor_units
            .checked_mul(u64::from(line.quantity))
            .ok_or(PricingError::TotalOverflow)?;
        total = total
            .checked_add(line_total)
            .ok_or(PricingError::TotalOverflow)?;

        lines.push(PricedLineItem {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price_minor_units: product.unit_price_minor_units,
            quantity: line.quantity,
            line_total_minor_units: line_total,
        });
    }

    Ok(PricedCart {
        lines,
        total_minor_units: total,
        currency,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::CartLineInput;

    fn product(id: &str, price: u64) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("{id} gift card"),
            unit_price_minor_units: price,
            currency: CurrencyCode::USD,
            image_ref: None,
        }
    }

    fn catalog() -> Vec<Product> {
        vec![
            product("amazon-25", 2500),
            product("steam-50", 5000),
            product("odd-price", 1999),
        ]
    }

    /// Client lines straight to a priced cart, as checkout does.
    fn price_inputs(
        inputs: &[CartLineInput],
        catalog: &[Product],
        currency: CurrencyCode,
    ) -> Result<PricedCart, PricingError> {
        let cart = Cart::from_inputs(inputs)?;
        price(&cart, catalog, currency)
    }

    fn input(id: &str, quantity: Option<i64>) -> CartLineInput {
        CartLineInput {
            product_id: ProductId::new(id),
            quantity,
        }
    }

    #[test]
    fn test_two_amazon_cards_total_5000() {
        let priced =
            price_inputs(&[input("amazon-25", Some(2))], &catalog(), CurrencyCode::USD).unwrap();
        assert_eq!(priced.total_minor_units, 5000);
        assert_eq!(priced.lines.len(), 1);
        assert_eq!(priced.lines[0].line_total_minor_units, 5000);
        assert_eq!(priced.lines[0].name, "amazon-25 gift card");
    }

    #[test]
    fn test_total_is_exact_integer_sum() {
        let inputs = [
            input("odd-price", Some(3)),
            input("amazon-25", Some(7)),
            input("steam-50", None),
        ];
        let priced = price_inputs(&inputs, &catalog(), CurrencyCode::USD).unwrap();
        assert_eq!(priced.total_minor_units, 1999 * 3 + 2500 * 7 + 5000);
        assert!(priced.is_consistent());
    }

    #[test]
    fn test_many_small_prices_do_not_drift() {
        let catalog = vec![product("dime", 10)];
        let priced =
            price_inputs(&[input("dime", Some(3))], &catalog, CurrencyCode::USD).unwrap();
        // 0.1 * 3 in binary floating point is not 0.3
        assert_eq!(priced.total_minor_units, 30);
    }

    #[test]
    fn test_unknown_product_fails_atomically() {
        let inputs = [input("amazon-25", Some(1)), input("nope", Some(1))];
        let result = price_inputs(&inputs, &catalog(), CurrencyCode::USD);
        assert!(matches!(
            result,
            Err(PricingError::UnknownProduct(ref id)) if id.as_str() == "nope"
        ));
    }

    #[test]
    fn test_invalid_quantity() {
        for bad in [0, -2] {
            assert!(matches!(
                price_inputs(&[input("amazon-25", Some(bad))], &catalog(), CurrencyCode::USD),
                Err(PricingError::InvalidQuantity { .. })
            ));
        }
    }

    #[test]
    fn test_currency_mismatch() {
        let mut eur = product("eur-card", 1000);
        eur.currency = CurrencyCode::EUR;
        let catalog = vec![eur];
        assert!(matches!(
            price_inputs(&[input("eur-card", None)], &catalog, CurrencyCode::USD),
            Err(PricingError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let catalog = vec![product("huge", u64::MAX / 2)];
        assert!(matches!(
            price_inputs(&[input("huge", Some(3))], &catalog, CurrencyCode::USD),
            Err(PricingError::TotalOverflow)
        ));
    }

    #[test]
    fn test_hashmap_catalog() {
        let map: HashMap<ProductId, Product> =
            catalog().into_iter().map(|p| (p.id.clone(), p)).collect();
        let mut cart = Cart::default();
        cart.add(ProductId::new("steam-50"), 2).unwrap();
        let priced = price(&cart, &map, CurrencyCode::USD).unwrap();
        assert_eq!(priced.total_minor_units, 10_000);
    }
}
