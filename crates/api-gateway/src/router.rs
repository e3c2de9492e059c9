//! The REST request pipeline.
//!
//! Every request passes through, in order:
//!
//! 1. Preflight: `OPTIONS` is answered by the outer CORS layer and never
//!    reaches this router.
//! 2. Route resolution: public routes skip authentication.
//! 3. Authentication: bearer token → [`Identity`].
//! 4. Rate limiting: keyed by client id, or by client address on public routes.
//! 5. Authorization: the route's permission against the identity.
//! 6. Dispatch to a handler.
//! 7. Response: JSON body or typed error plus the rate-limit header. CORS
//!    headers are added on the way out by the same outer layer.
//!
//! Errors from any step are converted to the wire format exactly once, here.

use crate::domain::config::GatewayConfig;
use crate::domain::error::{ApiError, ApiResult};
use crate::domain::identity::{ClientRegistry, Identity};
use crate::domain::routes::{Access, RouteHandler, RouteTable};
use crate::handlers::{self, admin, auth, host};
use crate::middleware::{authenticate, client_address, GatewayMetrics, RateLimiter, RequestTimer};
use crate::ports::outbound::{HostFacade, TimeSource};
use crate::security::tokens::CredentialIssuer;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub static RATE_LIMIT_REMAINING_HEADER: HeaderName =
    HeaderName::from_static("x-ratelimit-remaining");

/// Endpoint id for requests that match no route.
pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Shared, immutable request pipeline. Clone the `Arc`, not the router.
pub struct GatewayRouter {
    routes: RouteTable,
    clients: ClientRegistry,
    issuer: Arc<CredentialIssuer>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<GatewayMetrics>,
    host: Arc<dyn HostFacade>,
    clock: Arc<dyn TimeSource>,
    max_body_size: usize,
    command_timeout: Duration,
}

impl GatewayRouter {
    pub fn new(
        config: &GatewayConfig,
        issuer: Arc<CredentialIssuer>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<GatewayMetrics>,
        host: Arc<dyn HostFacade>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            routes: handlers::standard_routes(),
            clients: ClientRegistry::from_config(&config.clients),
            issuer,
            limiter,
            metrics,
            host,
            clock,
            max_body_size: config.http.max_body_size,
            command_timeout: config.admin.command_timeout,
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Run one request through the pipeline. Never fails; every outcome is
    /// a response.
    pub async fn handle(&self, request: Request<Body>, peer: Option<SocketAddr>) -> Response {
        let timer = RequestTimer::new(self.metrics.clone());
        let mut remaining = None;
        let mut response = match self.process(request, peer, &mut remaining).await {
            Ok(body) => Json(body).into_response(),
            Err(error) => error.into_response(),
        };

        if let Some(remaining) = remaining {
            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING_HEADER.clone(), HeaderValue::from(remaining));
        }
        timer.finish(response.status().is_success());
        response
    }

    async fn process(
        &self,
        request: Request<Body>,
        peer: Option<SocketAddr>,
        remaining: &mut Option<u32>,
    ) -> ApiResult<Value> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        let Some((route, params)) = self.routes.resolve(&parts.method, path) else {
            let caller = client_address(&parts.headers, peer);
            self.rate_limit(&caller, UNMATCHED_ENDPOINT, remaining)?;
            debug!(method = %parts.method, path, "No route");
            return Err(ApiError::endpoint_not_found(path));
        };

        let identity = match route.access {
            Access::Public => None,
            Access::Requires(_) => Some(
                authenticate(&self.issuer, &parts.headers)
                    .inspect_err(|_| self.metrics.record_auth_failure())?,
            ),
        };

        let caller = match &identity {
            Some(identity) => identity.client_id.clone(),
            None => client_address(&parts.headers, peer),
        };
        self.rate_limit(&caller, route.pattern.as_str(), remaining)?;

        if let (Access::Requires(permission), Some(identity)) = (route.access, &identity) {
            authorize(identity, permission).inspect_err(|_| self.metrics.record_forbidden())?;
        }

        // bodies without Content-Length are only cut off here
        let raw = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|_| ApiError::payload_too_large(self.max_body_size))?;

        match (route.handler, identity) {
            (RouteHandler::Health, _) => Ok(handlers::health(self.clock.as_ref())),
            (RouteHandler::IssueToken, _) => auth::issue_token(&self.clients, &self.issuer, &raw).await,
            (RouteHandler::Admin(action), Some(identity)) => {
                admin::handle(action, Arc::clone(&self.host), &identity, &raw, self.command_timeout).await
            }
            // admin routes are never public
            (RouteHandler::Admin(_), None) => Err(ApiError::missing_token()),
            (RouteHandler::Host(bind), _) => {
                let request = bind(&params, &raw)?;
                host::dispatch(self.host.as_ref(), request).await
            }
        }
    }

    fn rate_limit(&self, caller: &str, endpoint: &str, remaining: &mut Option<u32>) -> ApiResult<()> {
        let decision = self.limiter.try_acquire(caller, endpoint);
        *remaining = Some(decision.remaining);
        if decision.allowed {
            return Ok(());
        }
        self.metrics.record_rate_limit_rejection();
        Err(ApiError::rate_limited(decision.retry_after_secs))
    }
}

fn authorize(identity: &Identity, permission: &str) -> ApiResult<()> {
    if identity.has_permission(permission) {
        Ok(())
    } else {
        debug!(client_id = %identity.client_id, permission, "Permission denied");
        Err(ApiError::insufficient_permissions(permission))
    }
}
