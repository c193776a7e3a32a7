use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use super::common::validate_input;
use crate::{
    errors::ServiceError,
    models::CartSnapshot,
    services::QuoteItem,
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteLine {
    #[validate(length(min = 1, max = 128))]
    pub product_id: String,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CartQuoteRequest {
    #[validate]
    #[serde(default)]
    pub items: Vec<QuoteLine>,
}

pub fn cart_routes() -> Router<AppState> {
    Router::new().route("/cart/quote", post(quote_cart))
}

/// Price a cart against the current catalog
#[utoipa::path(
    post,
    path = "/api/cart/quote",
    summary = "Quote cart",
    description = "Prices the given products at current catalog prices and returns subtotal, tax, delivery fee and grand total. Nothing is reserved.",
    request_body = CartQuoteRequest,
    responses(
        (status = 200, description = "Cart priced", body = ApiResponse<CartSnapshot>),
        (status = 400, description = "Empty or invalid cart", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn quote_cart(
    State(state): State<AppState>,
    Json(request): Json<CartQuoteRequest>,
) -> Result<Json<ApiResponse<CartSnapshot>>, ServiceError> {
    validate_input(&request)?;
    let items: Vec<QuoteItem> = request
        .items
        .into_iter()
        .map(|line| QuoteItem {
            product_id: line.product_id,
            quantity: line.quantity,
        })
        .collect();

    let snapshot = state.services.cart.quote(&items).await?;
    Ok(Json(ApiResponse::success(snapshot)))
}
