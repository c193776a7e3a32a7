use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::order::OrderStatus;
use crate::repositories::RepositoryError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Forbidden")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid payment method: {0}")]
    InvalidPaymentMethod(String),

    #[error("Missing payment details: {0}")]
    MissingPaymentDetails(String),

    #[error("Price changed for product {product_id}")]
    PriceMismatch { product_id: String },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment signature rejected")]
    PaymentRejected,

    #[error("Persistence failure during {operation}: {message}")]
    PersistenceFailure { operation: String, message: String },

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    pub fn invalid_transition(from: OrderStatus, to: OrderStatus) -> Self {
        ServiceError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::ProductNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::EmptyCart
            | Self::InvalidPaymentMethod(_)
            | Self::MissingPaymentDetails(_)
            | Self::PaymentRejected => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidTransition { .. }
            | Self::ConcurrentModification(_)
            | Self::Conflict(_)
            | Self::PriceMismatch { .. } => StatusCode::CONFLICT,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PersistenceFailure { .. } | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Infrastructure errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::PersistenceFailure { operation, .. } => {
                format!("Could not complete {}; please retry", operation)
            }
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Payment gateway error".to_string(),
            Self::GatewayTimeout(_) => "Payment gateway timed out".to_string(),
            Self::CircuitBreakerOpen => "Payment gateway temporarily unavailable".to_string(),
            Self::PaymentRejected => "Invalid signature, payment verification failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(status, self.response_message());
        (status, Json(body)).into_response()
    }
}

/// Converts store errors into service errors, keeping their kind and
/// naming the step that failed.
pub trait RepositoryResultExt<T> {
    fn during(self, operation: &str) -> Result<T, ServiceError>;
}

impl<T> RepositoryResultExt<T> for Result<T, RepositoryError> {
    fn during(self, operation: &str) -> Result<T, ServiceError> {
        self.map_err(|err| ServiceError::from_repository(err, operation))
    }
}

impl ServiceError {
    pub fn from_repository(err: RepositoryError, operation: &str) -> Self {
        match err {
            RepositoryError::NotFound(what) => {
                ServiceError::NotFound(format!("{} ({})", what, operation))
            }
            RepositoryError::VersionConflict { id, .. } => ServiceError::ConcurrentModification(id),
            RepositoryError::InsufficientStock {
                product_id,
                requested,
                available,
            } => ServiceError::InsufficientStock(format!(
                "product {} has {} available, {} requested",
                product_id, available, requested
            )),
            RepositoryError::Unavailable(message) => ServiceError::PersistenceFailure {
                operation: operation.to_string(),
                message,
            },
        }
    }
}
