//! WebSocket surface: session registry, client protocol, server-pushed events.

pub mod events;
pub mod handler;
pub mod sessions;

pub use events::{status_broadcast_task, topics, EventPublisher, GatewayEvent, LogBroadcastLayer};
pub use handler::{serve, topic_permission, WsContext};
pub use sessions::{ConnectionHandle, SessionRegistry, ALL_TOPICS};
