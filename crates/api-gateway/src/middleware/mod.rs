//! Cross-cutting request concerns.
//!
//! Outer layers, outermost first: CORS (answers preflight) → Tracing →
//! rejection bodies → Timeout → body limit. Inside the router: Auth →
//! RateLimit → Authorize → Dispatch.

pub mod auth;
pub mod cors;
pub mod metrics;
pub mod rate_limit;
pub mod rejection;
pub mod tracing;

pub use auth::{authenticate, bearer_token, client_address};
pub use cors::create_cors_layer;
pub use metrics::{GatewayMetrics, RequestTimer};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use rejection::uniform_rejection;
pub use tracing::{TracingLayer, REQUEST_ID_HEADER};
