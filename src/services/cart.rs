use std::sync::Arc;
use tracing::instrument;

use crate::{
    errors::ServiceError,
    models::{Cart, CartLine, CartSnapshot, PricingPolicy},
    repositories::{CatalogStore, RepositoryError},
};

/// A product and quantity to be priced from the catalog.
#[derive(Debug, Clone)]
pub struct QuoteItem {
    pub product_id: String,
    pub quantity: u32,
}

/// Prices carts against current catalog listings. Nothing is reserved.
#[derive(Clone)]
pub struct CartService {
    catalog: Arc<dyn CatalogStore>,
    pricing: PricingPolicy,
}

impl CartService {
    pub fn new(catalog: Arc<dyn CatalogStore>, pricing: PricingPolicy) -> Self {
        Self { catalog, pricing }
    }

    pub fn pricing(&self) -> &PricingPolicy {
        &self.pricing
    }

    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn quote(&self, items: &[QuoteItem]) -> Result<CartSnapshot, ServiceError> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items.iter().filter(|i| i.quantity > 0) {
            let product = self
                .catalog
                .get_product(&item.product_id)
                .await
                .map_err(|err| match err {
                    RepositoryError::NotFound(_) => {
                        ServiceError::ProductNotFound(item.product_id.clone())
                    }
                    other => ServiceError::from_repository(other, "catalog lookup"),
                })?;
            lines.push(CartLine {
                product_id: product.id,
                name: product.name,
                unit_price: product.price,
                quantity: item.quantity,
                image: product.image,
            });
        }

        let cart = Cart::from_lines(lines);
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        Ok(cart.snapshot(&self.pricing))
    }
}
