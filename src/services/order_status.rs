use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::{RepositoryResultExt, ServiceError},
    models::{Order, OrderStatus, Party, PaymentStatus, TransitionDenied},
    repositories::{OrderRepository, RepositoryError},
};

/// Version conflicts are retried against fresh state this many times.
const MAX_RETRIES: usize = 3;

/// Applies fulfillment and payment transitions with per-party authorization.
#[derive(Clone)]
pub struct OrderStatusService {
    orders: Arc<dyn OrderRepository>,
}

impl OrderStatusService {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Moves the fulfillment axis. Non-parties are refused before the
    /// transition itself is considered.
    #[instrument(skip(self, actor), fields(order_id = %order_id, user_id = %actor.user_id, to = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
        new_status: OrderStatus,
    ) -> Result<Order, ServiceError> {
        let updated = self
            .apply(order_id, "update order status", |order| {
                let party = order
                    .party_of(&actor.user_id, actor.is_farmer())
                    .ok_or_else(|| not_a_party(order.id))?;

                match order.status.check_transition(new_status, party) {
                    Ok(()) => {}
                    Err(TransitionDenied::WrongParty { allowed }) => {
                        info!(from = %order.status, %party, %allowed, "Transition belongs to the other party");
                        return Err(ServiceError::Forbidden(format!(
                            "only the {} may move an order from {} to {}",
                            allowed, order.status, new_status
                        )));
                    }
                    Err(TransitionDenied::NotAllowed) => {
                        info!(from = %order.status, "Transition not allowed");
                        return Err(ServiceError::invalid_transition(order.status, new_status));
                    }
                }

                let mut next = order.clone();
                next.status = new_status;
                next.updated_at = Utc::now();
                Ok(Some(next))
            })
            .await?;

        info!(status = %updated.status, version = updated.version, "Order status updated");
        Ok(updated)
    }

    /// Moves the payment axis. Buyer only; re-asserting the current value
    /// succeeds without a write.
    #[instrument(skip(self, actor), fields(order_id = %order_id, user_id = %actor.user_id, to = %new_status))]
    pub async fn update_payment_status(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
        new_status: PaymentStatus,
    ) -> Result<Order, ServiceError> {
        self.apply(order_id, "update payment status", |order| {
            if order.party_of(&actor.user_id, actor.is_farmer()) != Some(Party::Buyer) {
                return Err(not_a_party(order.id));
            }
            if order.payment_status == new_status {
                debug!("Payment status unchanged");
                return Ok(None);
            }
            if !order.payment_status.can_transition(new_status) {
                info!(from = %order.payment_status, "Payment transition not allowed");
                return Err(ServiceError::InvalidTransition {
                    from: order.payment_status.to_string(),
                    to: new_status.to_string(),
                });
            }

            let mut next = order.clone();
            next.payment_status = new_status;
            next.updated_at = Utc::now();
            Ok(Some(next))
        })
        .await
        .map(|order| {
            info!(payment_status = %order.payment_status, version = order.version, "Payment status settled");
            order
        })
    }

    /// Load, decide, conditionally write. `decide` returns `None` when no
    /// write is needed. Conflicting writes re-run `decide` on fresh state.
    async fn apply<F>(
        &self,
        order_id: Uuid,
        operation: &str,
        mut decide: F,
    ) -> Result<Order, ServiceError>
    where
        F: FnMut(&Order) -> Result<Option<Order>, ServiceError> + Send,
    {
        let mut attempt = 0;
        loop {
            let current = self.orders.get(order_id).await.during("load order")?;
            let Some(next) = decide(&current)? else {
                return Ok(current);
            };

            match self.orders.update(next, current.version).await {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::VersionConflict { expected, actual, .. })
                    if attempt < MAX_RETRIES =>
                {
                    attempt += 1;
                    debug!(attempt, expected, actual, "Order changed underneath; retrying");
                }
                Err(err) => {
                    if matches!(err, RepositoryError::VersionConflict { .. }) {
                        warn!(attempts = attempt + 1, "Giving up after repeated version conflicts");
                    }
                    return Err(ServiceError::from_repository(err, operation));
                }
            }
        }
    }
}

fn not_a_party(order_id: Uuid) -> ServiceError {
    ServiceError::Forbidden(format!("not a party to order {}", order_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::{DeliveryAddress, OrderLine, PaymentMethod};
    use crate::repositories::{
        IdempotencyKey, InMemoryOrderRepository, Insertion, OrderPage,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn buyer(id: &str) -> AuthUser {
        AuthUser {
            user_id: id.into(),
            role: Role::Buyer,
        }
    }

    fn farmer(id: &str) -> AuthUser {
        AuthUser {
            user_id: id.into(),
            role: Role::Farmer,
        }
    }

    fn pending_order() -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            buyer_id: "buyer-b".into(),
            items: vec![OrderLine {
                product_id: "p1".into(),
                farmer_id: "farmer-f".into(),
                name: "Potatoes".into(),
                quantity: 3,
                unit_price_at_purchase: dec!(50),
            }],
            total_amount: dec!(150),
            payment_method: PaymentMethod::Cod,
            payment_details: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            delivery_address: DeliveryAddress::Line("X".into()),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup() -> (OrderStatusService, InMemoryOrderRepository, Uuid) {
        let repo = InMemoryOrderRepository::new();
        let Insertion::Created(order) = repo.insert(pending_order(), None).await.unwrap() else {
            panic!("expected insert");
        };
        (OrderStatusService::new(Arc::new(repo.clone())), repo, order.id)
    }

    #[tokio::test]
    async fn seller_accepts_then_buyer_is_forbidden() {
        let (svc, _, id) = setup().await;
        let accepted = svc
            .update_status(id, &farmer("farmer-f"), OrderStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.status, OrderStatus::Accepted);
        assert!(accepted.updated_at >= accepted.created_at);

        let err = svc
            .update_status(id, &buyer("buyer-b"), OrderStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn strangers_are_forbidden_before_transition_checks() {
        let (svc, _, id) = setup().await;
        let err = svc
            .update_status(id, &farmer("farmer-z"), OrderStatus::Shipped)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn token_role_decides_the_side_a_user_acts_for() {
        let (svc, repo, id) = setup().await;
        let before = repo.get(id).await.unwrap();

        let err = svc
            .update_status(id, &buyer("farmer-f"), OrderStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = svc
            .update_status(id, &farmer("buyer-b"), OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = svc
            .update_payment_status(id, &farmer("buyer-b"), PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        assert_eq!(repo.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn terminal_orders_reject_everything_unchanged() {
        let (svc, repo, id) = setup().await;
        svc.update_status(id, &buyer("buyer-b"), OrderStatus::Cancelled)
            .await
            .unwrap();
        let before = repo.get(id).await.unwrap();

        for to in [OrderStatus::Accepted, OrderStatus::Completed, OrderStatus::Cancelled] {
            let err = svc
                .update_status(id, &farmer("farmer-f"), to)
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidTransition { .. }));
        }
        assert_eq!(repo.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn shipped_can_complete() {
        let (svc, _, id) = setup().await;
        let f = farmer("farmer-f");
        svc.update_status(id, &f, OrderStatus::Accepted).await.unwrap();
        svc.update_status(id, &f, OrderStatus::Shipped).await.unwrap();
        let done = svc.update_status(id, &f, OrderStatus::Completed).await.unwrap();
        assert_eq!(done.status, OrderStatus::Completed);
        assert_eq!(done.version, 4);
    }

    #[tokio::test]
    async fn payment_axis_rules() {
        let (svc, repo, id) = setup().await;
        let b = buyer("buyer-b");

        let err = svc
            .update_payment_status(id, &farmer("farmer-f"), PaymentStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let same = svc
            .update_payment_status(id, &b, PaymentStatus::Pending)
            .await
            .unwrap();
        assert_eq!(same.version, 1);

        svc.update_payment_status(id, &b, PaymentStatus::Completed)
            .await
            .unwrap();
        let err = svc
            .update_payment_status(id, &b, PaymentStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));

        // Completing twice is an idempotent success.
        let again = svc
            .update_payment_status(id, &b, PaymentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(again.version, repo.get(id).await.unwrap().version);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (svc, _, _) = setup().await;
        let err = svc
            .update_status(Uuid::new_v4(), &buyer("buyer-b"), OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    /// Reports a version conflict on the first `conflicts` writes.
    struct ContendedRepo {
        inner: InMemoryOrderRepository,
        conflicts: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl OrderRepository for ContendedRepo {
        async fn insert(
            &self,
            order: Order,
            key: Option<IdempotencyKey>,
        ) -> Result<Insertion, RepositoryError> {
            self.inner.insert(order, key).await
        }
        async fn find_by_idempotency_key(
            &self,
            buyer_id: &str,
            key: &str,
        ) -> Result<Option<(Order, String)>, RepositoryError> {
            self.inner.find_by_idempotency_key(buyer_id, key).await
        }
        async fn get(&self, id: Uuid) -> Result<Order, RepositoryError> {
            self.inner.get(id).await
        }
        async fn update(&self, order: Order, expected: u64) -> Result<Order, RepositoryError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) < self.conflicts {
                return Err(RepositoryError::VersionConflict {
                    id: order.id,
                    expected,
                    actual: expected + 1,
                });
            }
            self.inner.update(order, expected).await
        }
        async fn list_by_buyer(&self, b: &str, p: u64, n: u64) -> Result<OrderPage, RepositoryError> {
            self.inner.list_by_buyer(b, p, n).await
        }
        async fn list_by_farmer(&self, f: &str, p: u64, n: u64) -> Result<OrderPage, RepositoryError> {
            self.inner.list_by_farmer(f, p, n).await
        }
    }

    async fn contended(conflicts: usize) -> (OrderStatusService, Uuid) {
        let inner = InMemoryOrderRepository::new();
        let Insertion::Created(order) = inner.insert(pending_order(), None).await.unwrap() else {
            panic!("expected insert");
        };
        let repo = ContendedRepo {
            inner,
            conflicts,
            writes: AtomicUsize::new(0),
        };
        (OrderStatusService::new(Arc::new(repo)), order.id)
    }

    #[tokio::test]
    async fn conflicts_are_retried() {
        let (svc, id) = contended(MAX_RETRIES).await;
        let order = svc
            .update_status(id, &farmer("farmer-f"), OrderStatus::Accepted)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces_as_concurrent_modification() {
        let (svc, id) = contended(MAX_RETRIES + 1).await;
        let err = svc
            .update_status(id, &farmer("farmer-f"), OrderStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConcurrentModification(got) if got == id));
    }
}
