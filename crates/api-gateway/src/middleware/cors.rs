//! CORS layer built from [`CorsConfig`].
//!
//! Wraps the whole application, so preflight never reaches authentication or
//! rate limiting, and every response gets the headers, rejections included.

use crate::domain::config::CorsConfig;
use axum::http::{HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tracing::warn;

fn parsed<T: std::str::FromStr>(values: &[String], kind: &str) -> Vec<T> {
    values
        .iter()
        .filter_map(|v| match v.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(value = %v, kind, "Ignoring unparseable CORS entry");
                None
            }
        })
        .collect()
}

/// Create the CORS layer from gateway config.
///
/// A `*` entry mirrors the request origin (or headers) instead of sending a
/// literal `*` when credentials are allowed, since browsers reject that pair.
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    let wildcard = |values: &[String]| values.iter().any(|v| v == "*");

    let mut cors = CorsLayer::new();

    cors = if !wildcard(&config.allowed_origins) {
        let origins: Vec<HeaderValue> = parsed(&config.allowed_origins, "origin");
        cors.allow_origin(AllowOrigin::list(origins))
    } else if config.allow_credentials {
        cors.allow_origin(AllowOrigin::mirror_request())
    } else {
        cors.allow_origin(Any)
    };

    let methods: Vec<Method> = parsed(&config.allowed_methods, "method");
    cors = cors.allow_methods(methods);

    cors = if !wildcard(&config.allowed_headers) {
        let headers: Vec<HeaderName> = parsed(&config.allowed_headers, "header");
        cors.allow_headers(headers)
    } else if config.allow_credentials {
        cors.allow_headers(AllowHeaders::mirror_request())
    } else {
        cors.allow_headers(Any)
    };

    if !config.exposed_headers.is_empty() {
        let exposed: Vec<HeaderName> = parsed(&config.exposed_headers, "header");
        cors = cors.expose_headers(exposed);
    }

    cors.max_age(Duration::from_secs(config.max_age))
        .allow_credentials(config.allow_credentials)
}
