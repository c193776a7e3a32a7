use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use std::{path::Path, sync::Arc};
use tracing::{debug, info};

use super::{CatalogStore, RepositoryError};
use crate::models::{Product, ProductStatus};

/// Product listings held in memory, keyed by product id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    products: Arc<DashMap<String, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.upsert(product);
        }
        catalog
    }

    /// Loads listings from a JSON array of products.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog seed {}", path.display()))?;
        let products: Vec<Product> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog seed {}", path.display()))?;
        info!(count = products.len(), path = %path.display(), "Loaded catalog seed");
        Ok(Self::with_products(products))
    }

    pub fn upsert(&self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get_product(&self, product_id: &str) -> Result<Product, RepositoryError> {
        self.products
            .get(product_id)
            .map(|p| p.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("product {}", product_id)))
    }

    async fn reserve_stock(&self, product_id: &str, quantity: u32) -> Result<u32, RepositoryError> {
        let mut product = self
            .products
            .get_mut(product_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("product {}", product_id)))?;

        let available = if product.status == ProductStatus::Available {
            product.stock
        } else {
            0
        };
        if quantity == 0 || available < quantity {
            return Err(RepositoryError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: quantity,
                available,
            });
        }

        product.stock -= quantity;
        if product.stock == 0 {
            product.status = ProductStatus::Sold;
        }
        debug!(product_id, quantity, remaining = product.stock, "Reserved stock");
        Ok(product.stock)
    }

    async fn release_stock(&self, product_id: &str, quantity: u32) -> Result<(), RepositoryError> {
        let mut product = self
            .products
            .get_mut(product_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("product {}", product_id)))?;

        product.stock = product.stock.saturating_add(quantity);
        if product.status == ProductStatus::Sold && product.stock > 0 {
            product.status = ProductStatus::Available;
        }
        debug!(product_id, quantity, stock = product.stock, "Released stock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn onions(stock: u32) -> Product {
        Product {
            id: "onion".into(),
            name: "Red Onions".into(),
            farmer_id: "farmer-1".into(),
            price: dec!(30),
            stock,
            status: ProductStatus::Available,
            image: None,
        }
    }

    #[tokio::test]
    async fn reserve_refuses_to_oversell() {
        let catalog = InMemoryCatalog::with_products([onions(3)]);
        assert_eq!(catalog.reserve_stock("onion", 2).await.unwrap(), 1);

        let err = catalog.reserve_stock("onion", 2).await.unwrap_err();
        assert_eq!(
            err,
            RepositoryError::InsufficientStock {
                product_id: "onion".into(),
                requested: 2,
                available: 1,
            }
        );
        assert_eq!(catalog.get_product("onion").await.unwrap().stock, 1);
    }

    #[tokio::test]
    async fn selling_out_marks_sold_and_release_restores() {
        let catalog = InMemoryCatalog::with_products([onions(2)]);
        catalog.reserve_stock("onion", 2).await.unwrap();
        assert_eq!(
            catalog.get_product("onion").await.unwrap().status,
            ProductStatus::Sold
        );

        catalog.release_stock("onion", 2).await.unwrap();
        let product = catalog.get_product("onion").await.unwrap();
        assert_eq!(product.stock, 2);
        assert_eq!(product.status, ProductStatus::Available);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_go_negative() {
        let catalog = InMemoryCatalog::with_products([onions(5)]);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                catalog.reserve_stock("onion", 1).await.is_ok()
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
        assert_eq!(catalog.get_product("onion").await.unwrap().stock, 0);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            catalog.get_product("nope").await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn loads_seed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"okra","name":"Okra","farmerId":"f9","price":"55.5","stock":12}}]"#
        )
        .unwrap();

        let catalog = InMemoryCatalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 1);
    }
}
