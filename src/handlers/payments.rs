use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::common::validate_input;
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateGatewayOrderRequest {
    /// Amount in display units (e.g. rupees); converted to minor units before it leaves the service
    #[schema(example = "286.00")]
    pub amount: Decimal,
    #[validate(length(equal = 3))]
    #[serde(default)]
    pub currency: Option<String>,
    #[validate(length(min = 1, max = 40))]
    #[serde(default)]
    pub receipt: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrderResponse {
    pub gateway_order_id: String,
    /// Amount in minor units as accepted by the gateway
    pub amount: u64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Completed-payment callback. The gateway's checkout widget posts its own
/// field names, so both spellings are accepted.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(default, alias = "razorpay_order_id")]
    pub gateway_order_id: String,
    #[serde(default, alias = "razorpay_payment_id")]
    pub gateway_payment_id: String,
    #[serde(default, alias = "razorpay_signature")]
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub verified: bool,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub message: String,
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payment/create-order", post(create_gateway_order))
        .route("/payment/verify-payment", post(verify_payment))
}

/// Create a payment-intent with the gateway
#[utoipa::path(
    post,
    path = "/api/payment/create-order",
    summary = "Create gateway order",
    request_body = CreateGatewayOrderRequest,
    responses(
        (status = 200, description = "Gateway order created", body = ApiResponse<GatewayOrderResponse>),
        (status = 400, description = "Invalid amount, currency or receipt", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected the request", body = crate::errors::ErrorResponse),
        (status = 503, description = "Gateway temporarily unavailable", body = crate::errors::ErrorResponse),
        (status = 504, description = "Gateway timed out", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn create_gateway_order(
    State(state): State<AppState>,
    Json(request): Json<CreateGatewayOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GatewayOrderResponse>>), ServiceError> {
    validate_input(&request)?;

    let order = state
        .services
        .payments
        .create_gateway_order(request.amount, request.currency, request.receipt)
        .await?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(GatewayOrderResponse {
            gateway_order_id: order.id,
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt,
            status: order.status,
        })),
    ))
}

/// Verify a completed payment's signature
#[utoipa::path(
    post,
    path = "/api/payment/verify-payment",
    summary = "Verify payment signature",
    description = "Checks HMAC-SHA256(key_secret, gatewayOrderId|gatewayPaymentId). Marking the order paid is a separate call.",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Signature verified", body = ApiResponse<VerifyPaymentResponse>),
        (status = 400, description = "Missing fields or invalid signature", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<VerifyPaymentResponse>>, ServiceError> {
    state.services.payments.verify(
        &request.gateway_order_id,
        &request.gateway_payment_id,
        &request.signature,
    )?;

    Ok(Json(ApiResponse::success(VerifyPaymentResponse {
        verified: true,
        gateway_order_id: request.gateway_order_id,
        gateway_payment_id: request.gateway_payment_id,
        message: "Payment verified successfully".to_string(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_body_accepts_gateway_field_names() {
        let native: VerifyPaymentRequest = serde_json::from_value(serde_json::json!({
            "razorpay_order_id": "order_1",
            "razorpay_payment_id": "pay_1",
            "razorpay_signature": "abc",
            "sellerAddress": "ignored"
        }))
        .unwrap();
        assert_eq!(native.gateway_order_id, "order_1");
        assert_eq!(native.gateway_payment_id, "pay_1");
        assert_eq!(native.signature, "abc");

        let camel: VerifyPaymentRequest = serde_json::from_value(serde_json::json!({
            "gatewayOrderId": "order_2",
            "gatewayPaymentId": "pay_2",
            "signature": "def"
        }))
        .unwrap();
        assert_eq!(camel.gateway_order_id, "order_2");
    }

    #[test]
    fn create_order_body_bounds_receipt_and_currency() {
        let request: CreateGatewayOrderRequest = serde_json::from_value(serde_json::json!({
            "amount": 10,
            "currency": "RUPEES",
            "receipt": "r".repeat(41)
        }))
        .unwrap();
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("currency"));
        assert!(fields.contains_key("receipt"));
    }
}
