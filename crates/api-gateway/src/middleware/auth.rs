//! Bearer authentication and caller address resolution.

use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::Identity;
use crate::security::tokens::{CredentialIssuer, TokenVerdict};
use axum::http::{header, HeaderMap};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

const BEARER_PREFIX: &str = "Bearer ";

/// Pull the raw token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> ApiResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| ApiError::invalid_token("Expected Bearer token")))
        .transpose()?
        .unwrap_or("");

    if value.trim().is_empty() {
        return Err(ApiError::missing_token());
    }

    value
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .ok_or_else(|| ApiError::invalid_token("Expected Bearer token"))
}

/// Map a verdict to an identity or the matching 401.
pub fn identity_from_verdict(verdict: TokenVerdict) -> ApiResult<Identity> {
    match verdict {
        TokenVerdict::Valid(identity) => Ok(identity),
        TokenVerdict::Invalid { reason } => Err(ApiError::invalid_token(reason)),
        TokenVerdict::Expired => Err(ApiError::expired_token()),
    }
}

/// Authenticate a request from its headers.
pub fn authenticate(issuer: &CredentialIssuer, headers: &HeaderMap) -> ApiResult<Identity> {
    let token = bearer_token(headers)?;
    let result = identity_from_verdict(issuer.verify(token));
    if let Err(e) = &result {
        debug!(code = e.code(), "Authentication failed");
    }
    result
}

/// Caller address for public routes: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket peer, else `unknown`.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };

    forwarded
        .or_else(real_ip)
        .or_else(|| peer.map(|p| p.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
