//! Server-pushed events: topic catalogue, publisher, periodic status and
//! log forwarding.

use crate::handlers::host::call_host;
use crate::ports::outbound::HostFacade;
use crate::ws::sessions::SessionRegistry;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Topic names clients can subscribe to.
pub mod topics {
    pub const PLAYER_CONNECT: &str = "player.connect";
    pub const PLAYER_JOIN: &str = "player.join";
    pub const PLAYER_LEAVE: &str = "player.leave";
    pub const PLAYER_CHAT: &str = "player.chat";
    pub const PLAYER_GAMEMODE: &str = "player.gamemode";
    pub const ENTITY_REMOVE: &str = "entity.remove";
    pub const SERVER_STATUS: &str = "server.status";
    pub const SERVER_LOG: &str = "server.log";

    pub const ALL: [&str; 8] = [
        PLAYER_CONNECT,
        PLAYER_JOIN,
        PLAYER_LEAVE,
        PLAYER_CHAT,
        PLAYER_GAMEMODE,
        ENTITY_REMOVE,
        SERVER_STATUS,
        SERVER_LOG,
    ];
}

/// Host-side happenings the gateway forwards to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    PlayerConnect { uuid: String, name: String },
    PlayerJoin { uuid: String, name: String, world: String },
    PlayerLeave { uuid: String, name: String, reason: String },
    PlayerChat { uuid: String, name: String, message: String },
    PlayerGameMode { uuid: String, game_mode: String },
    EntityRemove { uuid: String, entity_type: String },
}

impl GatewayEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::PlayerConnect { .. } => topics::PLAYER_CONNECT,
            Self::PlayerJoin { .. } => topics::PLAYER_JOIN,
            Self::PlayerLeave { .. } => topics::PLAYER_LEAVE,
            Self::PlayerChat { .. } => topics::PLAYER_CHAT,
            Self::PlayerGameMode { .. } => topics::PLAYER_GAMEMODE,
            Self::EntityRemove { .. } => topics::ENTITY_REMOVE,
        }
    }

    pub fn data(&self) -> Value {
        match self {
            Self::PlayerConnect { uuid, name } => json!({ "uuid": uuid, "name": name }),
            Self::PlayerJoin { uuid, name, world } => {
                json!({ "uuid": uuid, "name": name, "world": world })
            }
            Self::PlayerLeave { uuid, name, reason } => {
                json!({ "uuid": uuid, "name": name, "reason": reason })
            }
            Self::PlayerChat { uuid, name, message } => {
                json!({ "uuid": uuid, "name": name, "message": message })
            }
            Self::PlayerGameMode { uuid, game_mode } => {
                json!({ "uuid": uuid, "gameMode": game_mode })
            }
            Self::EntityRemove { uuid, entity_type } => {
                json!({ "uuid": uuid, "type": entity_type })
            }
        }
    }
}

/// Cloneable handle the host uses to push events.
#[derive(Clone)]
pub struct EventPublisher {
    sessions: Arc<SessionRegistry>,
}

impl EventPublisher {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    pub fn emit(&self, event: &GatewayEvent) -> usize {
        self.publish(event.topic(), &event.data())
    }

    /// Publish an arbitrary payload. Returns the number of sessions reached.
    pub fn publish(&self, topic: &str, data: &Value) -> usize {
        self.sessions.broadcast(topic, data)
    }
}

/// Publish the host's status snapshot every `interval` while anyone is
/// connected.
pub async fn status_broadcast_task(
    host: Arc<dyn HostFacade>,
    sessions: Arc<SessionRegistry>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if sessions.is_empty() {
            continue;
        }
        match call_host("server_status", host.server_status()).await {
            Ok(status) => {
                sessions.broadcast(topics::SERVER_STATUS, &status);
            }
            Err(e) => debug!(code = e.code(), "Status broadcast skipped"),
        }
    }
}

/// Events from the WebSocket modules themselves are never forwarded.
const SUPPRESSED_TARGET: &str = "api_gateway::ws";

/// Forwards log events to `server.log` subscribers.
pub struct LogBroadcastLayer {
    sessions: Arc<SessionRegistry>,
}

impl LogBroadcastLayer {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl MessageVisitor {
    fn into_line(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl<S: Subscriber> Layer<S> for LogBroadcastLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(SUPPRESSED_TARGET) || self.sessions.is_empty() {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let thread = std::thread::current();
        let data = json!({
            "level": metadata.level().as_str(),
            "message": visitor.into_line(),
            "target": metadata.target(),
            "time": chrono::Utc::now().to_rfc3339(),
            "thread": thread.name().unwrap_or("unnamed"),
        });
        self.sessions.broadcast(topics::SERVER_LOG, &data);
    }
}
