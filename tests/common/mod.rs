#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use agrismart_orders::{
    auth::{AuthService, Role},
    build_router,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    config::AppConfig,
    handlers::{AppServices, PaymentSettings},
    models::{PricingPolicy, Product, ProductStatus},
    repositories::{InMemoryCatalog, InMemoryOrderRepository},
    services::{payments::sign, HttpPaymentGateway},
    AppState,
};
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

pub const JWT_SECRET: &str =
    "integration_test_secret_that_is_comfortably_longer_than_sixty_four_characters_0123";
pub const GATEWAY_KEY_ID: &str = "rzp_test_key";
pub const GATEWAY_KEY_SECRET: &str = "rzp_test_secret";

pub const BUYER: &str = "buyer-b";
pub const OTHER_BUYER: &str = "buyer-c";
pub const FARMER: &str = "farmer-f";
pub const OTHER_FARMER: &str = "farmer-g";

/// Application over in-memory stores with the payment gateway pointed at a
/// local mock server.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub orders: InMemoryOrderRepository,
    pub catalog: InMemoryCatalog,
    pub gateway: MockServer,
    auth: Arc<AuthService>,
}

pub fn product(id: &str, farmer: &str, price: Decimal, stock: u32) -> Product {
    Product {
        id: id.to_string(),
        name: format!("Produce {}", id),
        farmer_id: farmer.to_string(),
        price,
        stock,
        status: ProductStatus::Available,
        image: None,
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let gateway = MockServer::start().await;

        let catalog = InMemoryCatalog::with_products([
            product("P1", FARMER, Decimal::from(50), 10),
            product("P2", OTHER_FARMER, Decimal::from(120), 2),
            product("P3", FARMER, Decimal::new(3550, 2), 100),
        ]);
        let orders = InMemoryOrderRepository::new();

        let mut cfg = AppConfig::new(JWT_SECRET.to_string(), "test".to_string());
        cfg.payment_gateway.base_url = gateway.uri();
        cfg.payment_gateway.key_id = GATEWAY_KEY_ID.to_string();
        cfg.payment_gateway.key_secret = GATEWAY_KEY_SECRET.to_string();
        cfg.payment_gateway.timeout_secs = 1;

        let http_gateway = HttpPaymentGateway::new(
            gateway.uri(),
            GATEWAY_KEY_ID,
            GATEWAY_KEY_SECRET,
            Duration::from_millis(500),
            CircuitBreaker::new(
                "payment_gateway",
                CircuitBreakerConfig {
                    failure_threshold: 3,
                    timeout: Duration::from_secs(30),
                    success_threshold: 1,
                },
            ),
        )
        .expect("gateway client");

        let services = AppServices::new(
            Arc::new(orders.clone()),
            Arc::new(catalog.clone()),
            Arc::new(http_gateway),
            PricingPolicy::default(),
            PaymentSettings {
                key_secret: GATEWAY_KEY_SECRET.to_string(),
                default_currency: "INR".to_string(),
                receipt_prefix: "rcpt_".to_string(),
            },
        );

        let auth = Arc::new(AuthService::new(JWT_SECRET, Duration::from_secs(3600)));
        let state = AppState {
            config: cfg,
            auth: auth.clone(),
            services,
        };

        Self {
            router: build_router(state.clone()),
            state,
            orders,
            catalog,
            gateway,
            auth,
        }
    }

    pub fn buyer_token(&self, user_id: &str) -> String {
        self.auth
            .issue_token(user_id, Role::Buyer)
            .expect("issue buyer token")
    }

    pub fn farmer_token(&self, user_id: &str) -> String {
        self.auth
            .issue_token(user_id, Role::Farmer)
            .expect("issue farmer token")
    }

    /// Signature the gateway would attach to a completed payment.
    pub fn gateway_signature(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        sign(GATEWAY_KEY_SECRET, gateway_order_id, gateway_payment_id)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        self.request_with_headers(method, uri, body, token, &[])
            .await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Places a COD order for `buyer` and returns the response body.
    pub async fn place_cod_order(&self, buyer: &str, items: Value) -> Value {
        let token = self.buyer_token(buyer);
        let response = self
            .request(
                Method::POST,
                "/api/orders",
                Some(serde_json::json!({
                    "items": items,
                    "paymentMethod": "cod",
                    "deliveryAddress": "X"
                })),
                Some(&token),
            )
            .await;
        assert_eq!(response.status(), 201, "order placement failed");
        response_json(response).await
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
