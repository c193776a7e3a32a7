/*!
 * # Authentication
 *
 * Bearer-token authentication for the order API. Tokens are HS256 JWTs
 * carrying the user id and marketplace role; every order-mutating call takes
 * the acting identity from the token, never from the request body.
 */

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::errors::{ErrorResponse, ServiceError};

/// Marketplace role carried in the token.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    utoipa::ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Buyer,
    Farmer,
}

/// JWT claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Identity resolved from the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_farmer(&self) -> bool {
        self.role == Role::Farmer
    }

    /// Route-level role gate.
    pub fn require_role(&self, role: Role) -> Result<(), AuthError> {
        if self.role == role {
            Ok(())
        } else {
            debug!(user_id = %self.user_id, have = %self.role, need = %role, "Role gate refused");
            Err(AuthError::InsufficientRole(role))
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Requires the {0} role")]
    InsufficientRole(Role),

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl AuthError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::MissingToken => (StatusCode::UNAUTHORIZED, "AUTH_MISSING_TOKEN"),
            Self::InvalidToken => (StatusCode::UNAUTHORIZED, "AUTH_INVALID_TOKEN"),
            Self::TokenExpired => (StatusCode::UNAUTHORIZED, "AUTH_TOKEN_EXPIRED"),
            Self::InsufficientRole(_) => (StatusCode::FORBIDDEN, "AUTH_INSUFFICIENT_ROLE"),
            Self::TokenCreation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "AUTH_TOKEN_CREATION_FAILED")
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::MissingToken => "No authentication token provided".to_string(),
            Self::TokenCreation(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let mut body = ErrorResponse::new(status, message);
        body.details = Some(code.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InsufficientRole(_) => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

/// Issues and validates access tokens.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl,
        }
    }

    pub fn issue_token(&self, user_id: &str, role: Role) -> Result<String, AuthError> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.token_ttl)
            .map_err(|_| AuthError::TokenCreation("invalid token lifetime".to_string()))?;
        let claims = Claims {
            user_id: user_id.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        self.encode(&claims)
    }

    pub(crate) fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })?
            .claims;

        if claims.user_id.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AuthService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::InvalidToken)?;

        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidToken)?;

        let auth_service = Arc::<AuthService>::from_ref(state);
        let claims = auth_service.validate_token(token)?;

        Ok(AuthUser {
            user_id: claims.user_id,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-that-is-long-enough-for-hs256-signing-0123456789";

    fn service() -> AuthService {
        AuthService::new(SECRET, Duration::from_secs(3600))
    }

    #[test]
    fn issued_token_round_trips() {
        let auth = service();
        let token = auth.issue_token("buyer-7", Role::Buyer).unwrap();
        let claims = auth.validate_token(&token).unwrap();
        assert_eq!(claims.user_id, "buyer-7");
        assert_eq!(claims.role, Role::Buyer);
    }

    #[test]
    fn claims_use_camel_case_user_id() {
        let claims = Claims {
            user_id: "u1".into(),
            role: Role::Farmer,
            iat: 0,
            exp: 1,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["role"], "farmer");
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let auth = service();
        let past = Utc::now().timestamp() - 3600;
        let token = auth
            .encode(&Claims {
                user_id: "u1".into(),
                role: Role::Buyer,
                iat: past - 10,
                exp: past,
            })
            .unwrap();
        assert_eq!(auth.validate_token(&token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn token_signed_with_other_secret_is_invalid() {
        let other = AuthService::new(
            "another-secret-another-secret-another-secret-another-secret-xx",
            Duration::from_secs(60),
        );
        let token = other.issue_token("u1", Role::Buyer).unwrap();
        assert_eq!(service().validate_token(&token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn role_gate() {
        let farmer = AuthUser {
            user_id: "f1".into(),
            role: Role::Farmer,
        };
        assert!(farmer.require_role(Role::Farmer).is_ok());
        assert_eq!(
            farmer.require_role(Role::Buyer),
            Err(AuthError::InsufficientRole(Role::Buyer))
        );
        let status = ServiceError::from(AuthError::InsufficientRole(Role::Buyer)).status_code();
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
