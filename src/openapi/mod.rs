use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AgriSmart Orders API",
        version = "0.1.0",
        description = r#"
# AgriSmart Orders API

Order lifecycle, checkout and payment verification for a farmer-to-buyer produce marketplace.

## Features

- **Cart quotes**: subtotal, tax, delivery fee and grand total priced from the catalog
- **Checkout**: UPI, card and cash-on-delivery orders with stock reservation and idempotent retries
- **Order status**: seller and buyer transitions on separate fulfillment and payment axes
- **Payments**: gateway order creation and HMAC-SHA256 signature verification

## Authentication

Order endpoints require `Authorization: Bearer <token>`. The token carries `userId` and `role`
(`buyer` or `farmer`); client-supplied user ids are never trusted.

## Idempotency

`POST /api/orders` accepts an `Idempotency-Key` header. Replays with the same body return the
original order with status 200; reusing a key with a different body returns 409.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Checkout, order queries and status transitions"),
        (name = "Payments", description = "Payment gateway orders and signature verification"),
        (name = "Cart", description = "Cart pricing"),
        (name = "Health", description = "Liveness")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_buyer_orders,
        crate::handlers::orders::list_farmer_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::update_payment_status,
        crate::handlers::payments::create_gateway_order,
        crate::handlers::payments::verify_payment,
        crate::handlers::cart::quote_cart,
        crate::health_check,
    ),
    components(
        schemas(
            crate::HealthStatus,
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::CreateOrderItem,
            crate::handlers::orders::UpdateOrderStatusRequest,
            crate::handlers::orders::UpdatePaymentStatusRequest,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderLineResponse,
            crate::handlers::payments::CreateGatewayOrderRequest,
            crate::handlers::payments::GatewayOrderResponse,
            crate::handlers::payments::VerifyPaymentRequest,
            crate::handlers::payments::VerifyPaymentResponse,
            crate::handlers::cart::CartQuoteRequest,
            crate::handlers::cart::QuoteLine,
            crate::models::CartSnapshot,
            crate::models::CartLine,
            crate::models::Charges,
            crate::models::OrderStatus,
            crate::models::PaymentStatus,
            crate::models::PaymentMethod,
            crate::models::PaymentDetails,
            crate::models::StoredPaymentDetails,
            crate::models::DeliveryAddress,
            crate::auth::Role,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
