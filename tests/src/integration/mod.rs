//! # End-to-End Flows
//!
//! The gateway is served on a real listener and driven with `reqwest` and
//! `tokio-tungstenite`, the way an external dashboard would use it.

pub mod http_flows;
pub mod websocket_flows;
