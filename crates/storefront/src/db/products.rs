//! Gift card catalog.
//!
//! The catalog is loaded once at startup, either from the JSON file named by
//! `STOREFRONT_CATALOG_PATH` or from the catalog compiled into the binary.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use cardslawp_core::{CurrencyCode, Product, ProductId};

use super::RepositoryError;

/// Catalog shipped with the binary.
const BUILTIN_CATALOG: &str = include_str!("../../data/products.json");

/// Errors loading or validating a catalog file.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate product id: {0}")]
    DuplicateProduct(ProductId),

    #[error("product {product_id} is priced in {found}, expected {expected}")]
    CurrencyMismatch {
        product_id: ProductId,
        expected: CurrencyCode,
        found: CurrencyCode,
    },
}

/// Parse a catalog from JSON text.
///
/// # Errors
///
/// Returns `CatalogError::Parse` if the text is not a product array.
pub fn parse_catalog(json: &str) -> Result<Vec<Product>, CatalogError> {
    Ok(serde_json::from_str(json)?)
}

/// Load the catalog from `path`, or the built-in catalog when `None`.
///
/// # Errors
///
/// Returns `CatalogError` if the file cannot be read or parsed.
pub fn load_catalog(path: Option<&Path>) -> Result<Vec<Product>, CatalogError> {
    match path {
        Some(path) => parse_catalog(&std::fs::read_to_string(path)?),
        None => parse_catalog(BUILTIN_CATALOG),
    }
}

/// Check that product ids are unique and every product uses `currency`.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate_catalog(products: &[Product], currency: CurrencyCode) -> Result<(), CatalogError> {
    let mut seen = HashSet::with_capacity(products.len());
    for product in products {
        if !seen.insert(&product.id) {
            return Err(CatalogError::DuplicateProduct(product.id.clone()));
        }
        if product.currency != currency {
            return Err(CatalogError::CurrencyMismatch {
                product_id: product.id.clone(),
                expected: currency,
                found: product.currency,
            });
        }
    }
    Ok(())
}

/// Read access to the catalog, plus the admin-only insert.
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// All products in catalog order.
    async fn list(&self) -> Result<Vec<Product>, RepositoryError>;

    async fn get(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;

    /// Copy the listed products into a lookup map for pricing.
    /// Ids not in the catalog are simply absent from the result.
    async fn snapshot(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, RepositoryError>;

    /// Add a product.
    ///
    /// Returns `RepositoryError::Conflict` if the id is taken.
    async fn insert(&self, product: Product) -> Result<(), RepositoryError>;
}

/// Catalog held in memory, in insertion order.
#[derive(Default, Clone)]
pub struct InMemoryProductRepository {
    products: Arc<RwLock<Vec<Product>>>,
}

impl InMemoryProductRepository {
    #[must_use]
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products: Arc::new(RwLock::new(products)),
        }
    }

    /// Repository seeded with the built-in catalog.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Parse` if the bundled catalog is malformed.
    pub fn builtin() -> Result<Self, CatalogError> {
        Ok(Self::new(load_catalog(None)?))
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        Ok(self.products.read().await.clone())
    }

    async fn get(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.iter().find(|p| &p.id == id).cloned())
    }

    async fn snapshot(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products
            .iter()
            .filter(|p| ids.contains(&p.id))
            .map(|p| (p.id.clone(), p.clone()))
            .collect())
    }

    async fn insert(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        if products.iter().any(|p| p.id == product.id) {
            return Err(RepositoryError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        products.push(product);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(id: &str, cents: u64, currency: CurrencyCode) -> Product {
        Product {
            id: ProductId::new(id),
            name: id.to_owned(),
            unit_price_minor_units: cents,
            currency,
            image_ref: None,
        }
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let products = load_catalog(None).unwrap();
        assert!(!products.is_empty());
        validate_catalog(&products, CurrencyCode::USD).unwrap();

        let amazon = products
            .iter()
            .find(|p| p.id.as_str() == "amazon-25")
            .unwrap();
        assert_eq!(amazon.unit_price_minor_units, 2500);
    }

    #[test]
    fn test_validate_catalog_rejects_duplicates() {
        let products = vec![
            product("a", 100, CurrencyCode::USD),
            product("a", 200, CurrencyCode::USD),
        ];
        assert!(matches!(
            validate_catalog(&products, CurrencyCode::USD),
            Err(CatalogError::DuplicateProduct(id)) if id.as_str() == "a"
        ));
    }

    #[test]
    fn test_validate_catalog_rejects_foreign_currency() {
        let products = vec![product("a", 100, CurrencyCode::EUR)];
        assert!(matches!(
            validate_catalog(&products, CurrencyCode::USD),
            Err(CatalogError::CurrencyMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_only_contains_known_ids() {
        let repo = InMemoryProductRepository::new(vec![
            product("a", 100, CurrencyCode::USD),
            product("b", 200, CurrencyCode::USD),
        ]);
        let snapshot = repo
            .snapshot(&[ProductId::new("a"), ProductId::new("missing")])
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&ProductId::new("a")));
    }

    #[tokio::test]
    async fn test_insert_rejects_existing_id() {
        let repo = InMemoryProductRepository::new(vec![product("a", 100, CurrencyCode::USD)]);
        let result = repo.insert(product("a", 500, CurrencyCode::USD)).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));

        repo.insert(product("b", 500, CurrencyCode::USD)).await.unwrap();
        let ids: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![ProductId::new("a"), ProductId::new("b")]);
    }
}
