use chrono::Utc;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::{RepositoryResultExt, ServiceError},
    models::{
        Cart, CartLine, DeliveryAddress, Order, OrderLine, OrderStatus, PaymentDetails,
        PaymentMethod, Product, StoredPaymentDetails,
    },
    repositories::{CatalogStore, IdempotencyKey, Insertion, OrderRepository, RepositoryError},
};

/// A cart line as submitted by the client.
#[derive(Debug, Clone)]
pub struct CheckoutItem {
    pub product_id: String,
    pub quantity: u32,
    /// Price the buyer saw; must match the catalog at checkout.
    pub unit_price: Decimal,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub total_amount: Option<Decimal>,
    pub payment_method: String,
    pub payment_details: Option<PaymentDetails>,
    pub delivery_address: Option<DeliveryAddress>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    /// True when an earlier order bound to the same idempotency key was returned.
    pub replayed: bool,
}

/// Turns a submitted cart into a pending order.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogStore>,
}

struct Reservation {
    product_id: String,
    quantity: u32,
}

impl CheckoutService {
    pub fn new(orders: Arc<dyn OrderRepository>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { orders, catalog }
    }

    #[instrument(skip(self, request), fields(buyer_id = %buyer_id, lines = request.items.len()))]
    pub async fn checkout(
        &self,
        buyer_id: &str,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        if let Some(item) = request.items.iter().find(|i| i.quantity == 0) {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }

        let payment_method = PaymentMethod::from_str(request.payment_method.trim())
            .map_err(|_| ServiceError::InvalidPaymentMethod(request.payment_method.clone()))?;
        let payment_details = stored_payment_details(payment_method, request.payment_details.as_ref())?;

        let delivery_address = match &request.delivery_address {
            Some(address) if !address.is_blank() => address.clone(),
            _ => {
                return Err(ServiceError::ValidationError(
                    "deliveryAddress is required".to_string(),
                ))
            }
        };

        let fingerprint = fingerprint(&request, payment_method, &payment_details);
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some((existing, bound)) = self
                .orders
                .find_by_idempotency_key(buyer_id, key)
                .await
                .during("idempotency lookup")?
            {
                return replay(existing, &bound, &fingerprint);
            }
        }

        let products = self.resolve_products(&request.items).await?;

        let cart = Cart::from_lines(request.items.iter().map(|item| CartLine {
            product_id: item.product_id.clone(),
            name: item.name.clone().unwrap_or_default(),
            unit_price: item.unit_price,
            quantity: item.quantity,
            image: item.image.clone(),
        }));
        let subtotal = cart.subtotal();

        if let Some(claimed) = request.total_amount {
            if claimed != subtotal {
                return Err(ServiceError::ValidationError(format!(
                    "totalAmount {} does not match cart subtotal {}",
                    claimed, subtotal
                )));
            }
        }

        let items: Vec<OrderLine> = cart
            .into_lines()
            .into_iter()
            .filter_map(|line| {
                products.get(&line.product_id).map(|product| OrderLine {
                    product_id: product.id.clone(),
                    farmer_id: product.farmer_id.clone(),
                    name: product.name.clone(),
                    quantity: line.quantity,
                    unit_price_at_purchase: product.price,
                })
            })
            .collect();

        let reservations = self.reserve(&items).await?;

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            buyer_id: buyer_id.to_string(),
            total_amount: items.iter().map(OrderLine::line_total).sum(),
            items,
            payment_method,
            payment_details,
            status: OrderStatus::Pending,
            payment_status: payment_method.initial_payment_status(),
            delivery_address,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let idempotency = request.idempotency_key.as_ref().map(|key| IdempotencyKey {
            buyer_id: buyer_id.to_string(),
            key: key.clone(),
            fingerprint: fingerprint.clone(),
        });

        match self.orders.insert(order, idempotency).await {
            Ok(Insertion::Created(order)) => {
                info!(
                    order_id = %order.id,
                    total = %order.total_amount,
                    payment_method = %order.payment_method,
                    "Order created"
                );
                Ok(CheckoutOutcome {
                    order,
                    replayed: false,
                })
            }
            Ok(Insertion::Existing { order, fingerprint: bound }) => {
                // Lost a race with a concurrent request carrying the same key.
                self.release(&reservations).await;
                replay(order, &bound, &fingerprint)
            }
            Err(err) => {
                error!(error = %err, "Failed to persist order");
                self.release(&reservations).await;
                Err(ServiceError::from_repository(err, "persist order"))
            }
        }
    }

    async fn resolve_products(
        &self,
        items: &[CheckoutItem],
    ) -> Result<HashMap<String, Product>, ServiceError> {
        let mut products: HashMap<String, Product> = HashMap::new();
        for item in items {
            if !products.contains_key(&item.product_id) {
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
                products.insert(item.product_id.clone(), product);
            }

            if let Some(product) = products.get(&item.product_id) {
                if product.price != item.unit_price {
                    info!(
                        product_id = %item.product_id,
                        submitted = %item.unit_price,
                        current = %product.price,
                        "Cart price is stale"
                    );
                    return Err(ServiceError::PriceMismatch {
                        product_id: item.product_id.clone(),
                    });
                }
            }
        }
        Ok(products)
    }

    /// Conditionally takes stock for every line, undoing earlier lines if one fails.
    async fn reserve(&self, items: &[OrderLine]) -> Result<Vec<Reservation>, ServiceError> {
        let mut reserved = Vec::with_capacity(items.len());
        for line in items {
            match self
                .catalog
                .reserve_stock(&line.product_id, line.quantity)
                .await
            {
                Ok(_) => reserved.push(Reservation {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                }),
                Err(err) => {
                    warn!(product_id = %line.product_id, error = %err, "Stock reservation failed");
                    self.release(&reserved).await;
                    return Err(match err {
                        RepositoryError::NotFound(_) => {
                            ServiceError::ProductNotFound(line.product_id.clone())
                        }
                        other => ServiceError::from_repository(other, "reserve stock"),
                    });
                }
            }
        }
        Ok(reserved)
    }

    async fn release(&self, reservations: &[Reservation]) {
        for r in reservations {
            if let Err(err) = self.catalog.release_stock(&r.product_id, r.quantity).await {
                error!(
                    product_id = %r.product_id,
                    quantity = r.quantity,
                    error = %err,
                    "Failed to release reserved stock"
                );
            }
        }
    }
}

fn replay(order: Order, bound: &str, fingerprint: &str) -> Result<CheckoutOutcome, ServiceError> {
    if bound == fingerprint {
        info!(order_id = %order.id, "Replaying order for idempotency key");
        Ok(CheckoutOutcome {
            order,
            replayed: true,
        })
    } else {
        Err(ServiceError::Conflict(
            "Idempotency key was already used with a different request".to_string(),
        ))
    }
}

fn stored_payment_details(
    method: PaymentMethod,
    details: Option<&PaymentDetails>,
) -> Result<Option<StoredPaymentDetails>, ServiceError> {
    match method {
        PaymentMethod::Card => {
            let details = details.ok_or_else(|| {
                ServiceError::MissingPaymentDetails("card payments require paymentDetails".into())
            })?;
            let digits = details.card_digits().unwrap_or_default();
            if digits.is_empty() {
                return Err(ServiceError::MissingPaymentDetails("cardNumber".into()));
            }
            if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(ServiceError::ValidationError(
                    "cardNumber must be 12 to 19 digits".into(),
                ));
            }
            let cvv = details.cvv.as_deref().map(str::trim).unwrap_or_default();
            if cvv.is_empty() {
                return Err(ServiceError::MissingPaymentDetails("cvv".into()));
            }
            if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
                return Err(ServiceError::ValidationError("cvv must be 3 or 4 digits".into()));
            }
            Ok(Some(details.masked()))
        }
        PaymentMethod::Upi => Ok(details
            .map(|d| StoredPaymentDetails {
                upi_id: d.upi_id.clone(),
                ..Default::default()
            })
            .filter(|d| d.upi_id.is_some())),
        PaymentMethod::Cod => Ok(None),
    }
}

/// Digest of everything that shapes the order, used to tell a replay from key reuse.
fn fingerprint(
    request: &CheckoutRequest,
    method: PaymentMethod,
    details: &Option<StoredPaymentDetails>,
) -> String {
    let mut items: Vec<String> = request
        .items
        .iter()
        .map(|i| format!("{}:{}:{}", i.product_id, i.quantity, i.unit_price.normalize()))
        .collect();
    items.sort();

    let mut hasher = Sha256::new();
    hasher.update(items.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(method.to_string().as_bytes());
    hasher.update(b"|");
    if let Some(total) = request.total_amount {
        hasher.update(total.normalize().to_string().as_bytes());
    }
    hasher.update(b"|");
    hasher.update(serde_json::to_string(&request.delivery_address).unwrap_or_default());
    hasher.update(b"|");
    hasher.update(serde_json::to_string(details).unwrap_or_default());
    hex::encode(hasher.finalize())
}
