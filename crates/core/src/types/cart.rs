//! Shopping cart held in the visitor session.

use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Errors from cart mutation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    /// Quantity is zero, negative, or does not fit a line.
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: i64,
    },
}

/// A cart line as the client sends it. Quantity defaults to 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineInput {
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: Option<i64>,
}

impl CartLineInput {
    /// Validate the requested quantity, applying the default of 1.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] for zero, negative, or
    /// out-of-range quantities.
    pub fn quantity(&self) -> Result<u32, CartError> {
        let raw = self.quantity.unwrap_or(1);
        positive_quantity(&self.product_id, raw)
    }
}

fn positive_quantity(product_id: &ProductId, raw: i64) -> Result<u32, CartError> {
    u32::try_from(raw)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| CartError::InvalidQuantity {
            product_id: product_id.clone(),
            quantity: raw,
        })
}

/// A validated cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Ordered cart lines, one per product.
///
/// Adding a product that is already present increments its quantity instead
/// of appending a second line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Build a cart from client lines, merging duplicates in first-seen order.
    ///
    /// # Errors
    ///
    /// Fails on the first line with an invalid quantity; nothing is kept.
    pub fn from_inputs(inputs: &[CartLineInput]) -> Result<Self, CartError> {
        let mut cart = Self::default();
        for input in inputs {
            let quantity = input.quantity()?;
            cart.add(input.product_id.clone(), quantity)?;
        }
        Ok(cart)
    }

    /// Add `quantity` of a product, merging into an existing line.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] if `quantity` is zero or the
    /// merged quantity overflows.
    pub fn add(&mut self, product_id: ProductId, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity {
                product_id,
                quantity: 0,
            });
        }
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            let current = line.quantity;
            line.quantity = current
                .checked_add(quantity)
                .ok_or(CartError::InvalidQuantity {
                    product_id,
                    quantity: i64::from(current) + i64::from(quantity),
                })?;
        } else {
            self.lines.push(CartLine {
                product_id,
                quantity,
            });
        }
        Ok(())
    }

    /// Set a line's quantity. Zero removes the line; a product not yet in
    /// the cart is appended.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::InvalidQuantity`] for negative or out-of-range values.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: i64) -> Result<(), CartError> {
        if quantity == 0 {
            self.remove(&product_id);
            return Ok(());
        }
        let quantity = positive_quantity(&product_id, quantity)?;
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity;
        } else {
            self.lines.push(CartLine {
                product_id,
                quantity,
            });
        }
        Ok(())
    }

    /// Remove a product's line. Returns whether a line was removed.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| &l.product_id != product_id);
        self.lines.len() != before
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}
