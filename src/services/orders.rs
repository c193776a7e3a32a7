use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::{RepositoryResultExt, ServiceError},
    models::Order,
    repositories::{OrderPage, OrderRepository},
};

pub const DEFAULT_PER_PAGE: u64 = 20;
pub const MAX_PER_PAGE: u64 = 100;

/// Read side of the order book.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Orders placed by the buyer, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_buyer(
        &self,
        buyer_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let (page, per_page) = clamp_page(page, per_page);
        self.orders
            .list_by_buyer(buyer_id, page, per_page)
            .await
            .during("list buyer orders")
    }

    /// Orders containing at least one of the farmer's lines, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_farmer(
        &self,
        farmer_id: &str,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let (page, per_page) = clamp_page(page, per_page);
        self.orders
            .list_by_farmer(farmer_id, page, per_page)
            .await
            .during("list farmer orders")
    }

    /// Fetches an order for its buyer or a farmer owning one of its lines.
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn get_for_party(&self, order_id: Uuid, actor: &AuthUser) -> Result<Order, ServiceError> {
        let order = self.orders.get(order_id).await.during("load order")?;
        if order.party_of(&actor.user_id, actor.is_farmer()).is_none() {
            return Err(ServiceError::Forbidden(format!(
                "not a party to order {}",
                order_id
            )));
        }
        Ok(order)
    }
}

/// Normalizes 1-based pagination input.
pub fn clamp_page(page: u64, per_page: u64) -> (u64, u64) {
    let per_page = match per_page {
        0 => DEFAULT_PER_PAGE,
        n => n.min(MAX_PER_PAGE),
    };
    (page.max(1), per_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::{
        DeliveryAddress, OrderLine, OrderStatus, PaymentMethod, PaymentStatus,
    };
    use crate::repositories::{InMemoryOrderRepository, Insertion};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(buyer: &str, farmer: &str) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            buyer_id: buyer.into(),
            items: vec![OrderLine {
                product_id: "p".into(),
                farmer_id: farmer.into(),
                name: "Mangoes".into(),
                quantity: 1,
                unit_price_at_purchase: dec!(80),
            }],
            total_amount: dec!(80),
            payment_method: PaymentMethod::Upi,
            payment_details: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Processing,
            delivery_address: DeliveryAddress::Line("Market Yard".into()),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(clamp_page(0, 0), (1, DEFAULT_PER_PAGE));
        assert_eq!(clamp_page(3, 1000), (3, MAX_PER_PAGE));
    }

    #[tokio::test]
    async fn only_parties_can_read_an_order() {
        let repo = InMemoryOrderRepository::new();
        let Insertion::Created(stored) = repo.insert(order("b1", "f1"), None).await.unwrap() else {
            panic!("expected insert");
        };
        let svc = OrderService::new(Arc::new(repo));

        let as_farmer = AuthUser {
            user_id: "f1".into(),
            role: Role::Farmer,
        };
        assert_eq!(svc.get_for_party(stored.id, &as_farmer).await.unwrap().id, stored.id);

        let stranger = AuthUser {
            user_id: "b2".into(),
            role: Role::Buyer,
        };
        assert!(matches!(
            svc.get_for_party(stored.id, &stranger).await,
            Err(ServiceError::Forbidden(_))
        ));

        let page = svc.list_for_farmer("f1", 1, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(svc.list_for_buyer("b2", 1, 10).await.unwrap().orders.is_empty());
    }
}
