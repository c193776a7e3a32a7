use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::common::{
    created_response, success_response, validate_input, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::{AuthUser, Role},
    errors::ServiceError,
    models::{
        Charges, DeliveryAddress, Order, OrderLine, OrderStatus, PaymentDetails, PaymentMethod,
        PaymentStatus, PricingPolicy, StoredPaymentDetails,
    },
    repositories::OrderPage,
    services::{orders::clamp_page, CheckoutItem, CheckoutRequest},
    ApiResponse, AppState,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

fn validate_non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() {
        return Err(ValidationError::new("negative_amount"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderItem {
    #[validate(length(min = 1, max = 128))]
    pub product_id: String,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
    #[validate(custom = "validate_non_negative")]
    pub unit_price: Decimal,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate]
    #[serde(default)]
    pub items: Vec<CreateOrderItem>,
    #[validate(custom = "validate_non_negative")]
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    /// One of `upi`, `card`, `cod`
    #[serde(default)]
    #[schema(example = "cod")]
    pub payment_method: String,
    #[serde(default)]
    pub payment_details: Option<PaymentDetails>,
    #[serde(default)]
    pub delivery_address: Option<DeliveryAddress>,
}

impl CreateOrderRequest {
    fn into_checkout(self, idempotency_key: Option<String>) -> CheckoutRequest {
        CheckoutRequest {
            items: self
                .items
                .into_iter()
                .map(|item| CheckoutItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    name: item.name,
                    image: item.image,
                })
                .collect(),
            total_amount: self.total_amount,
            payment_method: self.payment_method,
            payment_details: self.payment_details,
            delivery_address: self.delivery_address,
            idempotency_key,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    #[schema(example = "accepted")]
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentStatusRequest {
    #[schema(example = "completed")]
    pub payment_status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineResponse {
    pub product_id: String,
    pub farmer_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price_at_purchase: Decimal,
    pub line_total: Decimal,
}

impl From<&OrderLine> for OrderLineResponse {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            farmer_id: line.farmer_id.clone(),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price_at_purchase: line.unit_price_at_purchase,
            line_total: line.line_total(),
        }
    }
}

/// Order as returned over HTTP. `charges` is derived from the frozen total on
/// every read.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub buyer_id: String,
    pub farmer_ids: Vec<String>,
    pub items: Vec<OrderLineResponse>,
    pub total_amount: Decimal,
    pub charges: Charges,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_details: Option<StoredPaymentDetails>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivery_address: DeliveryAddress,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_order(order: &Order, pricing: &PricingPolicy) -> Self {
        Self {
            id: order.id,
            buyer_id: order.buyer_id.clone(),
            farmer_ids: order.farmer_ids(),
            items: order.items.iter().map(OrderLineResponse::from).collect(),
            total_amount: order.total_amount,
            charges: pricing.charges(order.total_amount, !order.items.is_empty()),
            payment_method: order.payment_method,
            payment_details: order.payment_details.clone(),
            status: order.status,
            payment_status: order.payment_status,
            delivery_address: order.delivery_address.clone(),
            version: order.version,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

fn page_response(
    page: OrderPage,
    params: &PaginationParams,
    pricing: &PricingPolicy,
) -> PaginatedResponse<OrderResponse> {
    let (page_no, per_page) = clamp_page(params.page, params.per_page);
    let items = page
        .orders
        .iter()
        .map(|order| OrderResponse::from_order(order, pricing))
        .collect();
    PaginatedResponse::new(items, page_no, per_page, page.total)
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, ServiceError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| ServiceError::ValidationError("Idempotency-Key must be ASCII".to_string()))?
        .trim();
    if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ServiceError::ValidationError(format!(
            "Idempotency-Key must be 1 to {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(Some(key.to_string()))
}

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/buyer", get(list_buyer_orders))
        .route("/orders/farmer", get(list_farmer_orders))
        .route("/orders/farmer-requests", get(list_farmer_orders))
        .route("/orders/:order_id", get(get_order))
        .route("/orders/:order_id/status", patch(update_order_status))
        .route("/orders/:order_id/payment", patch(update_payment_status))
}

/// Place an order from a cart snapshot
#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Create order",
    description = "Checks out a cart snapshot. Replays with the same Idempotency-Key return the original order with 200.",
    request_body = CreateOrderRequest,
    params(
        ("Idempotency-Key" = Option<String>, Header, description = "Client-generated de-duplication token"),
    ),
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 200, description = "Idempotent replay of an earlier order", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid cart, payment method or payment details", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Price changed or idempotency key reused", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    auth_user.require_role(Role::Buyer)?;
    validate_input(&request)?;
    let key = idempotency_key(&headers)?;

    let outcome = state
        .services
        .checkout
        .checkout(&auth_user.user_id, request.into_checkout(key))
        .await?;

    let response = OrderResponse::from_order(&outcome.order, state.services.cart.pricing());
    if outcome.replayed {
        Ok(success_response(response))
    } else {
        Ok(created_response(response))
    }
}

/// List the caller's own orders
#[utoipa::path(
    get,
    path = "/api/orders/buyer",
    summary = "List buyer orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders placed by the caller, newest first", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_buyer_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ServiceError> {
    auth_user.require_role(Role::Buyer)?;
    let page = state
        .services
        .orders
        .list_for_buyer(&auth_user.user_id, params.page, params.per_page)
        .await?;
    Ok(success_response(page_response(
        page,
        &params,
        state.services.cart.pricing(),
    )))
}

/// List orders containing the caller's products
#[utoipa::path(
    get,
    path = "/api/orders/farmer",
    summary = "List farmer orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders with at least one of the caller's lines, newest first", body = ApiResponse<PaginatedResponse<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_farmer_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ServiceError> {
    auth_user.require_role(Role::Farmer)?;
    let page = state
        .services
        .orders
        .list_for_farmer(&auth_user.user_id, params.page, params.per_page)
        .await?;
    Ok(success_response(page_response(
        page,
        &params,
        state.services.cart.pricing(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/orders/{order_id}",
    summary = "Get order",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller is not a party to the order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_for_party(order_id, &auth_user)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_order(
        &order,
        state.services.cart.pricing(),
    ))))
}

/// Move an order along the fulfillment axis
#[utoipa::path(
    patch,
    path = "/api/orders/{order_id}/status",
    summary = "Update order status",
    description = "Sellers accept, reject, ship and complete; buyers cancel while the order is pending.",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Transition belongs to the other party", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Invalid transition or concurrent modification", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let status = OrderStatus::from_str(request.status.trim()).map_err(|_| {
        ServiceError::ValidationError(format!("Unknown order status '{}'", request.status))
    })?;

    let order = state
        .services
        .order_status
        .update_status(order_id, &auth_user, status)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_order(
        &order,
        state.services.cart.pricing(),
    ))))
}

/// Move an order along the payment axis
#[utoipa::path(
    patch,
    path = "/api/orders/{order_id}/payment",
    summary = "Update payment status",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdatePaymentStatusRequest,
    responses(
        (status = 200, description = "Payment status updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Unknown payment status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Only the buyer may update payment status", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Invalid transition or concurrent modification", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_payment_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    auth_user.require_role(Role::Buyer)?;
    let payment_status = PaymentStatus::from_str(request.payment_status.trim()).map_err(|_| {
        ServiceError::ValidationError(format!(
            "Unknown payment status '{}'",
            request.payment_status
        ))
    })?;

    let order = state
        .services
        .order_status
        .update_payment_status(order_id, &auth_user, payment_status)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from_order(
        &order,
        state.services.cart.pricing(),
    ))))
}
