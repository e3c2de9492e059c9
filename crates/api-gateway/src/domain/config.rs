//! Gateway configuration with validation.
//!
//! The gateway consumes an already-resolved [`GatewayConfig`]. Every section
//! has serde defaults so partial documents deserialize cleanly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Largest burst a single bucket can hold (tokens share a packed atomic word).
pub const MAX_BURST_SIZE: u32 = (1 << 24) - 1;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener
    pub http: HttpConfig,
    /// Token signing and validation
    pub jwt: JwtConfig,
    /// Per-key, per-endpoint rate limiting
    pub rate_limit: RateLimitConfig,
    /// CORS policy applied to every response
    pub cors: CorsConfig,
    /// WebSocket sessions and broadcast
    pub websocket: WebSocketConfig,
    /// Admin action behavior
    pub admin: AdminConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Registered API clients
    pub clients: Vec<ClientConfig>,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()?;

        if self.jwt.issuer.trim().is_empty() {
            return Err(ConfigError::InvalidJwt("issuer cannot be empty".into()));
        }
        if self.jwt.audience.trim().is_empty() {
            return Err(ConfigError::InvalidJwt("audience cannot be empty".into()));
        }
        if self.jwt.token_validity.as_secs() == 0 {
            return Err(ConfigError::InvalidJwt(
                "token_validity must be at least one second".into(),
            ));
        }

        if self.websocket.max_connections == 0 {
            return Err(ConfigError::InvalidLimit(
                "websocket.max_connections cannot be 0".into(),
            ));
        }
        if self.websocket.outbound_queue == 0 {
            return Err(ConfigError::InvalidLimit(
                "websocket.outbound_queue cannot be 0".into(),
            ));
        }
        if self.websocket.ping_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "websocket.ping_interval cannot be 0".into(),
            ));
        }
        if self.websocket.status_broadcast_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "websocket.status_broadcast_interval cannot be 0".into(),
            ));
        }
        if !self.websocket.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "websocket.path must start with '/': {}",
                self.websocket.path
            )));
        }

        if self.http.max_body_size == 0 {
            return Err(ConfigError::InvalidLimit("http.max_body_size cannot be 0".into()));
        }
        if self.http.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "http.request_timeout cannot be 0".into(),
            ));
        }
        if self.admin.command_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "admin.command_timeout cannot be 0".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for client in &self.clients {
            if client.id.trim().is_empty() {
                return Err(ConfigError::InvalidClient("client id cannot be empty".into()));
            }
            if !seen.insert(client.id.as_str()) {
                return Err(ConfigError::InvalidClient(format!(
                    "duplicate client id: {}",
                    client.id
                )));
            }
        }

        Ok(())
    }

    /// HTTP bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Maximum accepted request body in bytes
    pub max_body_size: usize,
    /// Upper bound on a single request, host calls included
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 7070,
            max_body_size: 64 * 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    #[serde(with = "humantime_serde")]
    pub token_validity: Duration,
    /// PKCS#8 PEM file holding the signing key; created on first start
    pub key_path: PathBuf,
    /// Overrides the key id derived from the public key
    pub key_id: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "host-api".into(),
            audience: "host-server".into(),
            token_validity: Duration::from_secs(3600),
            key_path: PathBuf::from("jwt-signing-key.pem"),
            key_id: None,
        }
    }
}

/// Limits for one endpoint (or the global default)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl EndpointLimit {
    pub const fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        Self {
            requests_per_minute,
            burst_size,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Global default replenishment rate
    pub requests_per_minute: u32,
    /// Global default burst ceiling
    pub burst_size: u32,
    /// Per-endpoint overrides. Keys are literal paths or prefixes ending in `/*`.
    pub endpoints: HashMap<String, EndpointLimit>,
    /// Idle time after which a bucket is swept
    #[serde(with = "humantime_serde")]
    pub bucket_expiry: Duration,
    /// Minimum spacing between sweeps
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert("/auth/token".to_string(), EndpointLimit::new(120, 20));
        endpoints.insert("/admin/*".to_string(), EndpointLimit::new(300, 50));

        Self {
            enabled: true,
            requests_per_minute: 600,
            burst_size: 100,
            endpoints,
            bucket_expiry: Duration::from_secs(10 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl RateLimitConfig {
    /// Resolve limits: exact path, then longest `/*` prefix, then the default.
    pub fn limits_for(&self, endpoint: &str) -> EndpointLimit {
        if let Some(limit) = self.endpoints.get(endpoint) {
            return *limit;
        }

        self.endpoints
            .iter()
            .filter_map(|(pattern, limit)| {
                let prefix = pattern.strip_suffix('*')?;
                endpoint.starts_with(prefix).then_some((prefix.len(), *limit))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, limit)| limit)
            .unwrap_or(EndpointLimit::new(self.requests_per_minute, self.burst_size))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let all = std::iter::once(("default", EndpointLimit::new(self.requests_per_minute, self.burst_size)))
            .chain(self.endpoints.iter().map(|(k, v)| (k.as_str(), *v)));

        for (name, limit) in all {
            if limit.requests_per_minute == 0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{}: requests_per_minute cannot be 0",
                    name
                )));
            }
            if limit.burst_size == 0 || limit.burst_size > MAX_BURST_SIZE {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{}: burst_size must be in 1..={}",
                    name, MAX_BURST_SIZE
                )));
            }
        }

        if self.bucket_expiry.is_zero() {
            return Err(ConfigError::InvalidRateLimit("bucket_expiry cannot be 0".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidRateLimit("cleanup_interval cannot be 0".into()));
        }
        Ok(())
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            allowed_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allowed_headers: ["Authorization", "Content-Type", "X-Request-ID"]
                .map(String::from)
                .to_vec(),
            exposed_headers: ["X-Request-ID", "X-RateLimit-Remaining"]
                .map(String::from)
                .to_vec(),
            allow_credentials: true,
            max_age: 86_400,
        }
    }
}

/// WebSocket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    /// Upgrade path
    pub path: String,
    /// Ceiling on authenticated sessions
    pub max_connections: usize,
    /// Outbound frames buffered per connection before it is evicted
    pub outbound_queue: usize,
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// Period of the `server.status` broadcast
    #[serde(with = "humantime_serde")]
    pub status_broadcast_interval: Duration,
    /// Largest inbound frame in bytes
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/ws".into(),
            max_connections: 100,
            outbound_queue: 256,
            ping_interval: Duration::from_secs(30),
            status_broadcast_interval: Duration::from_secs(5),
            max_message_size: 64 * 1024,
        }
    }
}

/// Admin action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// How long a dispatched command is awaited before reporting "dispatched"
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Forward log events to `server.log` subscribers
    pub broadcast_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            broadcast_logs: true,
        }
    }
}

/// A registered API client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub id: String,
    /// bcrypt hash (`$2a$`, `$2b$`, `$2x$` or `$2y$`)
    pub secret_hash: String,
    pub description: String,
    pub permissions: Vec<String>,
    pub enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            secret_hash: String::new(),
            description: String::new(),
            permissions: Vec::new(),
            enabled: true,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    #[error("invalid jwt settings: {0}")]
    InvalidJwt(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid client: {0}")]
    InvalidClient(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Durations as "250ms", "30s", "5m", "1h" or plain seconds
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration: {:?}", s))?;

        let scaled = |factor: u64| {
            value
                .checked_mul(factor)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {:?}", s))
        };
        match unit.trim() {
            "ms" => Ok(Duration::from_millis(value)),
            "" | "s" => Ok(Duration::from_secs(value)),
            "m" => scaled(60),
            "h" => scaled(3600),
            other => Err(format!("unknown duration unit: {:?}", other)),
        }
    }
}
