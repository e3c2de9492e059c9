//! Gateway error taxonomy and its wire representation.
//!
//! Every failure a client can observe is an [`ApiError`]. Components below the
//! router return it; the router converts it to a response exactly once.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Machine-readable error codes
pub mod codes {
    // 400
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const MISSING_FIELD: &str = "MISSING_FIELD";
    pub const INVALID_FIELD: &str = "INVALID_FIELD";
    pub const INVALID_JSON: &str = "INVALID_JSON";
    pub const OUT_OF_BOUNDS: &str = "OUT_OF_BOUNDS";
    pub const INVALID_COORDINATES: &str = "INVALID_COORDINATES";

    // 401
    pub const MISSING_TOKEN: &str = "MISSING_TOKEN";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const EXPIRED_TOKEN: &str = "EXPIRED_TOKEN";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";

    // 403
    pub const INSUFFICIENT_PERMISSIONS: &str = "INSUFFICIENT_PERMISSIONS";
    pub const CLIENT_DISABLED: &str = "CLIENT_DISABLED";

    // 404
    pub const ENDPOINT_NOT_FOUND: &str = "ENDPOINT_NOT_FOUND";
    pub const PLAYER_NOT_FOUND: &str = "PLAYER_NOT_FOUND";
    pub const WORLD_NOT_FOUND: &str = "WORLD_NOT_FOUND";
    pub const ENTITY_NOT_FOUND: &str = "ENTITY_NOT_FOUND";
    pub const BLOCK_NOT_FOUND: &str = "BLOCK_NOT_FOUND";
    pub const PLUGIN_NOT_FOUND: &str = "PLUGIN_NOT_FOUND";
    pub const SLOT_NOT_FOUND: &str = "SLOT_NOT_FOUND";

    // 408 / 413
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
    pub const PAYLOAD_TOO_LARGE: &str = "PAYLOAD_TOO_LARGE";

    // 501
    pub const ENDPOINT_NOT_IMPLEMENTED: &str = "ENDPOINT_NOT_IMPLEMENTED";
    pub const FEATURE_NOT_IMPLEMENTED: &str = "FEATURE_NOT_IMPLEMENTED";

    // 429
    pub const RATE_LIMITED: &str = "RATE_LIMITED";

    // 500
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Generic message for internal failures. Detail stays in server logs.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Client-visible error, one variant per kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("[{code}] {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("[{code}] {message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("[{code}] {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("[{code}] {message}")]
    NotFound { code: &'static str, message: String },

    #[error("[{code}] {message}")]
    NotImplemented { code: &'static str, message: String },

    #[error("request body larger than {max_bytes} bytes")]
    PayloadTooLarge { max_bytes: usize },

    #[error("request timed out")]
    Timeout,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error")]
    Internal,
}

impl ApiError {
    // 400

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::BadRequest {
            code: codes::MISSING_FIELD,
            message: format!("Missing required field: {}", field),
        }
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::INVALID_FIELD,
            message: format!("Invalid value for '{}': {}", field, reason.into()),
        }
    }

    pub fn invalid_json(detail: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::INVALID_JSON,
            message: format!("Invalid JSON: {}", detail.into()),
        }
    }

    pub fn out_of_bounds(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::OUT_OF_BOUNDS,
            message: message.into(),
        }
    }

    pub fn invalid_coordinates(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: codes::INVALID_COORDINATES,
            message: message.into(),
        }
    }

    // 401

    pub fn missing_token() -> Self {
        Self::Unauthorized {
            code: codes::MISSING_TOKEN,
            message: "Authorization header required".into(),
        }
    }

    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            code: codes::INVALID_TOKEN,
            message: format!("Invalid token: {}", reason.into()),
        }
    }

    pub fn expired_token() -> Self {
        Self::Unauthorized {
            code: codes::EXPIRED_TOKEN,
            message: "Token has expired".into(),
        }
    }

    pub fn invalid_credentials() -> Self {
        Self::Unauthorized {
            code: codes::INVALID_CREDENTIALS,
            message: "Invalid client ID or secret".into(),
        }
    }

    // 403

    pub fn insufficient_permissions(permission: &str) -> Self {
        Self::Forbidden {
            code: codes::INSUFFICIENT_PERMISSIONS,
            message: format!("Required permission: {}", permission),
        }
    }

    pub fn client_disabled() -> Self {
        Self::Forbidden {
            code: codes::CLIENT_DISABLED,
            message: "Client is disabled".into(),
        }
    }

    // 404

    pub fn endpoint_not_found(path: &str) -> Self {
        Self::NotFound {
            code: codes::ENDPOINT_NOT_FOUND,
            message: format!("Endpoint not found: {}", path),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    // 501

    pub fn endpoint_not_implemented(endpoint: &str) -> Self {
        Self::NotImplemented {
            code: codes::ENDPOINT_NOT_IMPLEMENTED,
            message: format!("Endpoint not implemented: {}", endpoint),
        }
    }

    pub fn feature_not_implemented(feature: &str) -> Self {
        Self::NotImplemented {
            code: codes::FEATURE_NOT_IMPLEMENTED,
            message: format!("Feature not implemented: {}", feature),
        }
    }

    // 408 / 413

    pub fn payload_too_large(max_bytes: usize) -> Self {
        Self::PayloadTooLarge { max_bytes }
    }

    pub fn request_timeout() -> Self {
        Self::Timeout
    }

    // 429 / 500

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn internal() -> Self {
        Self::Internal
    }

    /// HTTP status for this kind
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine code, also used as the WebSocket `error` code
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::Unauthorized { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::NotImplemented { code, .. } => *code,
            Self::PayloadTooLarge { .. } => codes::PAYLOAD_TOO_LARGE,
            Self::Timeout => codes::REQUEST_TIMEOUT,
            Self::RateLimited { .. } => codes::RATE_LIMITED,
            Self::Internal => codes::INTERNAL_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::NotImplemented { message, .. } => message.clone(),
            Self::PayloadTooLarge { max_bytes } => {
                format!("Request body exceeds {} bytes", max_bytes)
            }
            Self::Timeout => "Request timed out".to_string(),
            Self::RateLimited { retry_after_secs } => format!(
                "Rate limit exceeded. Retry after {} seconds",
                retry_after_secs
            ),
            Self::Internal => INTERNAL_MESSAGE.to_string(),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Uniform error body: `{"error", "code", "message"}` plus `retryAfter`.
    pub fn body(&self) -> serde_json::Value {
        let status = self.status();
        let mut body = json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "code": self.code(),
            "message": self.message(),
        });
        if let Some(retry_after) = self.retry_after() {
            body["retryAfter"] = json!(retry_after);
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Some(retry_after) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::invalid_json(e.to_string())
    }
}

/// Result type for request handling
pub type ApiResult<T> = Result<T, ApiError>;

/// Service-level errors raised while building or running the gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    #[error("server bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("key material error: {0}")]
    KeyMaterial(#[from] crate::security::tokens::KeyError),

    #[error("internal error: {0}")]
    Internal(String),
}
