//! Domain types for the API Gateway.
//!
//! Permissions, identities, routes, configuration and the error taxonomy.
//! Nothing in here performs I/O.

pub mod config;
pub mod correlation;
pub mod error;
pub mod identity;
pub mod permissions;
pub mod routes;

pub use config::GatewayConfig;
pub use correlation::{ConnectionId, RequestId};
pub use error::{ApiError, ApiResult, GatewayError};
pub use identity::{ClientCredential, ClientRegistry, Identity};
pub use permissions::{perms, satisfies, PermissionSet};
pub use routes::{Access, AdminAction, PathParams, Route, RouteHandler, RoutePattern, RouteTable};
