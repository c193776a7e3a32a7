use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Order, Product};

pub mod catalog;
pub mod order_repository;

pub use catalog::InMemoryCatalog;
pub use order_repository::InMemoryOrderRepository;

/// Errors raised by the order store and the catalog store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict { id: Uuid, expected: u64, actual: u64 },

    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        available: u32,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Client-supplied de-duplication token for order creation, scoped to one buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey {
    pub buyer_id: String,
    pub key: String,
    /// Digest of the checkout payload the key was first used with.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub enum Insertion {
    Created(Order),
    /// The key was already bound to an order; nothing was written.
    Existing { order: Order, fingerprint: String },
}

/// A page of orders plus the total number of matches.
#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order. With a key, the insert is skipped when the key is
    /// already bound, and the bound order is returned instead.
    async fn insert(
        &self,
        order: Order,
        idempotency: Option<IdempotencyKey>,
    ) -> Result<Insertion, RepositoryError>;

    async fn find_by_idempotency_key(
        &self,
        buyer_id: &str,
        key: &str,
    ) -> Result<Option<(Order, String)>, RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Order, RepositoryError>;

    /// Writes `order` only if the stored version still equals `expected_version`.
    async fn update(&self, order: Order, expected_version: u64) -> Result<Order, RepositoryError>;

    /// Orders placed by `buyer_id`, newest first. `page` is 1-based.
    async fn list_by_buyer(
        &self,
        buyer_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, RepositoryError>;

    /// Orders with at least one line owned by `farmer_id`, newest first.
    async fn list_by_farmer(
        &self,
        farmer_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, RepositoryError>;
}

/// Read access to product listings plus the conditional stock update used at checkout.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, product_id: &str) -> Result<Product, RepositoryError>;

    /// Decrements stock only when at least `quantity` units remain; returns the remainder.
    async fn reserve_stock(&self, product_id: &str, quantity: u32) -> Result<u32, RepositoryError>;

    /// Returns previously reserved units.
    async fn release_stock(&self, product_id: &str, quantity: u32) -> Result<(), RepositoryError>;
}
