use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerError},
    errors::ServiceError,
    models::round_money,
};

type HmacSha256 = Hmac<Sha256>;

/// Longest receipt reference the gateway accepts.
pub const MAX_RECEIPT_LEN: usize = 40;

/// Outcome of checking a payment callback signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Rejected,
}

/// Hex HMAC-SHA256 of `"{gateway_order_id}|{gateway_payment_id}"`.
pub fn sign(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(gateway_payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Pure signature check; it does not touch any order.
pub fn verify_payment(
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    secret: &str,
) -> Verification {
    let expected = sign(secret, gateway_order_id, gateway_payment_id);
    if !expected.is_empty() && constant_time_eq(&expected, signature) {
        Verification::Verified
    } else {
        Verification::Rejected
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Payment intent created at the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Minor units.
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// `amount_minor` is already in the currency's smallest unit.
    async fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError>;
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: u64,
    currency: &'a str,
    receipt: &'a str,
    payment_capture: u8,
}

/// Gateway adapter speaking the `/v1/orders` REST API with basic auth.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
        breaker: CircuitBreaker,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            breaker,
        })
    }

    async fn post_order(&self, body: &CreateOrderBody<'_>) -> Result<GatewayOrder, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::GatewayTimeout(e.to_string())
                } else {
                    ServiceError::ExternalServiceError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}: {}",
                status, text
            )));
        }

        response.json::<GatewayOrder>().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::GatewayTimeout(e.to_string())
            } else {
                ServiceError::ExternalServiceError(format!("unreadable gateway response: {}", e))
            }
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn create_order(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayOrder, ServiceError> {
        let body = CreateOrderBody {
            amount: amount_minor,
            currency,
            receipt,
            payment_capture: 1,
        };

        match self.breaker.call(|| self.post_order(&body)).await {
            Ok(order) => Ok(order),
            Err(CircuitBreakerError::CircuitOpen) => {
                warn!("Payment gateway circuit open; refusing call");
                Err(ServiceError::CircuitBreakerOpen)
            }
            Err(CircuitBreakerError::Inner(err)) => {
                error!(error = %err, "Payment gateway call failed");
                Err(err)
            }
        }
    }
}

/// Display-unit amount to minor units (×100), rounded to cents first.
pub fn to_minor_units(amount: Decimal) -> Result<u64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "amount must be greater than zero".to_string(),
        ));
    }
    let minor = round_money(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_u64());
    match minor {
        Some(0) => Err(ServiceError::ValidationError(
            "amount is below the smallest currency unit".to_string(),
        )),
        Some(minor) => Ok(minor),
        None => Err(ServiceError::ValidationError("amount is out of range".to_string())),
    }
}

/// Gateway order creation and callback verification.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    key_secret: String,
    default_currency: String,
    receipt_prefix: String,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        key_secret: impl Into<String>,
        default_currency: impl Into<String>,
        receipt_prefix: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            key_secret: key_secret.into(),
            default_currency: default_currency.into(),
            receipt_prefix: receipt_prefix.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn create_gateway_order(
        &self,
        amount: Decimal,
        currency: Option<String>,
        receipt: Option<String>,
    ) -> Result<GatewayOrder, ServiceError> {
        let amount_minor = to_minor_units(amount)?;

        let currency = currency
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.default_currency.clone());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ServiceError::ValidationError(format!(
                "currency must be a 3-letter code, got {}",
                currency
            )));
        }

        let receipt = match receipt.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
            Some(r) if r.chars().count() > MAX_RECEIPT_LEN => {
                return Err(ServiceError::ValidationError(format!(
                    "receipt must be at most {} characters",
                    MAX_RECEIPT_LEN
                )))
            }
            Some(r) => r,
            None => self.generate_receipt(),
        };

        let order = self
            .gateway
            .create_order(amount_minor, &currency, &receipt)
            .await?;
        info!(gateway_order_id = %order.id, amount_minor, %currency, "Gateway order created");
        Ok(order)
    }

    fn generate_receipt(&self) -> String {
        format!("{}{}", self.receipt_prefix, Uuid::new_v4().simple())
            .chars()
            .take(MAX_RECEIPT_LEN)
            .collect()
    }

    /// Checks a completed-payment callback. A bad signature is an expected
    /// client error, not a server fault.
    #[instrument(skip(self, signature))]
    pub fn verify(
        &self,
        gateway_order_id: &str,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<(), ServiceError> {
        if gateway_order_id.is_empty() || gateway_payment_id.is_empty() || signature.is_empty() {
            return Err(ServiceError::ValidationError(
                "gatewayOrderId, gatewayPaymentId and signature are required".to_string(),
            ));
        }

        match verify_payment(gateway_order_id, gateway_payment_id, signature, &self.key_secret) {
            Verification::Verified => {
                info!("Payment signature verified");
                Ok(())
            }
            Verification::Rejected => {
                warn!("Payment signature rejected");
                Err(ServiceError::PaymentRejected)
            }
        }
    }
}
