pub mod cart;
pub mod common;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use crate::{
    models::PricingPolicy,
    repositories::{CatalogStore, OrderRepository},
    services::{
        CartService, CheckoutService, OrderService, OrderStatusService, PaymentGateway,
        PaymentService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub payments: Arc<PaymentService>,
}

/// Settings the payment service needs beyond the gateway itself.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub key_secret: String,
    pub default_currency: String,
    pub receipt_prefix: String,
}

impl AppServices {
    /// Wires every service over the given stores and gateway.
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogStore>,
        gateway: Arc<dyn PaymentGateway>,
        pricing: PricingPolicy,
        payment: PaymentSettings,
    ) -> Self {
        Self {
            cart: Arc::new(CartService::new(catalog.clone(), pricing)),
            checkout: Arc::new(CheckoutService::new(orders.clone(), catalog)),
            orders: Arc::new(OrderService::new(orders.clone())),
            order_status: Arc::new(OrderStatusService::new(orders)),
            payments: Arc::new(PaymentService::new(
                gateway,
                payment.key_secret,
                payment.default_currency,
                payment.receipt_prefix,
            )),
        }
    }
}
