//! Uniform bodies for rejections produced outside the router.
//!
//! `RequestBodyLimitLayer` and `TimeoutLayer` answer 413 and 408 with plain
//! text. This rewrites those into the gateway's JSON error shape.

use crate::domain::error::ApiError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

/// Replace a plain 413 or 408 with the matching [`ApiError`] response.
/// Anything else, and rejections already in JSON, pass through.
pub fn uniform_rejection(response: Response, max_body_size: usize) -> Response {
    let error = match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::payload_too_large(max_body_size),
        StatusCode::REQUEST_TIMEOUT => ApiError::request_timeout(),
        _ => return response,
    };
    if is_json(&response) {
        return response;
    }
    error.into_response()
}
