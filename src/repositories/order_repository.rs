use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use uuid::Uuid;

use super::{IdempotencyKey, Insertion, OrderPage, OrderRepository, RepositoryError};
use crate::models::Order;

#[derive(Debug, Clone)]
struct StoredOrder {
    order: Order,
    /// Insertion sequence; breaks ties between equal creation timestamps.
    seq: u64,
}

/// Order store backed by concurrent hash maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<DashMap<Uuid, StoredOrder>>,
    idempotency: Arc<DashMap<(String, String), (Uuid, String)>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn store(&self, mut order: Order) -> Order {
        order.version = 1;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.orders.insert(
            order.id,
            StoredOrder {
                order: order.clone(),
                seq,
            },
        );
        order
    }

    fn page_where<F>(&self, page: u64, per_page: u64, predicate: F) -> OrderPage
    where
        F: Fn(&Order) -> bool,
    {
        let mut matching: Vec<StoredOrder> = self
            .orders
            .iter()
            .filter(|entry| predicate(&entry.value().order))
            .map(|entry| entry.value().clone())
            .collect();

        matching.sort_by(|a, b| {
            b.order
                .created_at
                .cmp(&a.order.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let total = matching.len() as u64;
        let per_page = per_page.max(1);
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        let orders = matching
            .into_iter()
            .skip(offset as usize)
            .take(per_page as usize)
            .map(|stored| stored.order)
            .collect();

        OrderPage { orders, total }
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(
        &self,
        order: Order,
        idempotency: Option<IdempotencyKey>,
    ) -> Result<Insertion, RepositoryError> {
        let Some(key) = idempotency else {
            return Ok(Insertion::Created(self.store(order)));
        };

        match self.idempotency.entry((key.buyer_id, key.key)) {
            Entry::Occupied(bound) => {
                let (order_id, fingerprint) = bound.get().clone();
                drop(bound);
                let existing = self
                    .orders
                    .get(&order_id)
                    .map(|stored| stored.order.clone())
                    .ok_or_else(|| RepositoryError::NotFound(format!("order {}", order_id)))?;
                Ok(Insertion::Existing {
                    order: existing,
                    fingerprint,
                })
            }
            Entry::Vacant(slot) => {
                let order_id = order.id;
                let created = self.store(order);
                slot.insert((order_id, key.fingerprint));
                Ok(Insertion::Created(created))
            }
        }
    }

    async fn find_by_idempotency_key(
        &self,
        buyer_id: &str,
        key: &str,
    ) -> Result<Option<(Order, String)>, RepositoryError> {
        let bound = self
            .idempotency
            .get(&(buyer_id.to_string(), key.to_string()))
            .map(|entry| entry.value().clone());

        Ok(bound.and_then(|(order_id, fingerprint)| {
            self.orders
                .get(&order_id)
                .map(|stored| (stored.order.clone(), fingerprint))
        }))
    }

    async fn get(&self, id: Uuid) -> Result<Order, RepositoryError> {
        self.orders
            .get(&id)
            .map(|stored| stored.order.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", id)))
    }

    async fn update(
        &self,
        mut order: Order,
        expected_version: u64,
    ) -> Result<Order, RepositoryError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("order {}", order.id)))?;

        let actual = stored.order.version;
        if actual != expected_version {
            return Err(RepositoryError::VersionConflict {
                id: order.id,
                expected: expected_version,
                actual,
            });
        }

        order.version = actual + 1;
        stored.order = order.clone();
        Ok(order)
    }

    async fn list_by_buyer(
        &self,
        buyer_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, RepositoryError> {
        Ok(self.page_where(page, per_page, |order| order.buyer_id == buyer_id))
    }

    async fn list_by_farmer(
        &self,
        farmer_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, RepositoryError> {
        Ok(self.page_where(page, per_page, |order| order.has_farmer(farmer_id)))
    }
}
