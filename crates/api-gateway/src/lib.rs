//! Embedded API gateway: authenticated HTTP and WebSocket access to a host
//! process.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ApiGatewayService                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │   REST (fallback)                    WebSocket (/ws)         │
//! │        │                                   │                 │
//! │  ┌─────┴──────────────────────────┐  ┌─────┴──────────────┐  │
//! │  │ GatewayRouter                  │  │ ws::handler        │  │
//! │  │ Preflight → Auth → RateLimit → │  │ auth / subscribe / │  │
//! │  │ Authorize → Dispatch           │  │ unsubscribe / ping │  │
//! │  └─────┬──────────────────────────┘  └─────┬──────────────┘  │
//! │        │                                   │                 │
//! │  CredentialIssuer · PermissionSet · RateLimiter · Sessions   │
//! └────────┼───────────────────────────────────┼─────────────────┘
//!          ▼                                   ▲
//!     HostFacade                         EventPublisher
//!          │                                   │
//!          └────────────── host process ───────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use api_gateway::{ApiGatewayService, GatewayConfig};
//!
//! let service = ApiGatewayService::new(GatewayConfig::default(), host)?;
//! api_gateway::service::init_tracing(&service.config().logging, Some(service.sessions()))?;
//! let events = service.events();
//! service.start().await?;
//! ```
//!
//! # Security
//!
//! - bcrypt client secrets, Ed25519-signed bearer tokens
//! - Wildcard permissions checked on every route and subscription
//! - Per-client token buckets, per-address on public routes
//! - Bounded WebSocket queues; slow consumers are disconnected

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod security;
pub mod service;
pub mod ws;

// Re-exports for public API
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, ApiResult, GatewayError};
pub use domain::identity::Identity;
pub use domain::permissions::{perms, PermissionSet};
pub use middleware::{GatewayMetrics, RateLimiter};
pub use ports::outbound::{HostError, HostFacade, HostRequest, TimeSource};
pub use router::GatewayRouter;
pub use security::tokens::{CredentialIssuer, SigningKeys, TokenVerdict};
pub use service::ApiGatewayService;
pub use ws::{EventPublisher, GatewayEvent, SessionRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
