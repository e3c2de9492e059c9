//! # API Gateway Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # Scripted host, gateway on an ephemeral port, clients
//! └── integration/      # End-to-end flows over real sockets
//!     ├── http_flows.rs
//!     └── websocket_flows.rs
//!
//! tests/benches/
//! └── gateway_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p gateway-tests
//! cargo test -p gateway-tests integration::websocket_flows
//!
//! # Benchmarks
//! cargo bench -p gateway-tests
//! ```

pub mod integration;
pub mod support;
