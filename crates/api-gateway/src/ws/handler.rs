//! WebSocket protocol: in-band authentication, subscriptions, pings.
//!
//! [`WsConnection`] is the per-connection state machine and knows nothing
//! about sockets; [`serve`] drives it from a live socket. Every outbound
//! frame, replies included, goes through the connection's bounded queue so
//! ordering is preserved.

use crate::domain::config::WebSocketConfig;
use crate::domain::identity::Identity;
use crate::domain::permissions::perms;
use crate::ports::outbound::TimeSource;
use crate::security::tokens::{CredentialIssuer, TokenVerdict};
use crate::ws::sessions::{ConnectionHandle, Frame, SessionRegistry};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

/// WebSocket error codes
pub mod codes {
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
    pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";
    pub const ALREADY_AUTHENTICATED: &str = "ALREADY_AUTHENTICATED";
    pub const NOT_AUTHENTICATED: &str = "NOT_AUTHENTICATED";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const EXPIRED_TOKEN: &str = "EXPIRED_TOKEN";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const MAX_CONNECTIONS: &str = "MAX_CONNECTIONS";
    pub const MISSING_FIELD: &str = "MISSING_FIELD";
    pub const INVALID_FIELD: &str = "INVALID_FIELD";
}

/// How long a closing connection may take to flush queued frames.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Permission needed to subscribe to `topic`.
pub fn topic_permission(topic: &str) -> &'static str {
    match topic {
        "player.chat" | "chat.*" => perms::WEBSOCKET_SUBSCRIBE_CHAT,
        "logs.*" => perms::WEBSOCKET_SUBSCRIBE_LOGS,
        t if t.starts_with("server.log") => perms::WEBSOCKET_SUBSCRIBE_LOGS,
        t if t.starts_with("player.") => perms::WEBSOCKET_SUBSCRIBE_PLAYERS,
        t if t.starts_with("server.") => perms::WEBSOCKET_SUBSCRIBE_STATUS,
        _ => perms::WEBSOCKET_SUBSCRIBE_ALL,
    }
}

/// Shared collaborators for every connection.
pub struct WsContext {
    pub sessions: Arc<SessionRegistry>,
    pub issuer: Arc<CredentialIssuer>,
    pub clock: Arc<dyn TimeSource>,
    pub config: WebSocketConfig,
}

/// What the driver does after a client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Protocol state for one connection.
pub struct WsConnection {
    handle: ConnectionHandle,
    ctx: Arc<WsContext>,
    identity: Option<Identity>,
}

impl WsConnection {
    pub fn new(handle: ConnectionHandle, ctx: Arc<WsContext>) -> Self {
        Self {
            handle,
            ctx,
            identity: None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn error(&self, code: &str, message: impl Into<String>) -> Value {
        json!({
            "type": "error",
            "code": code,
            "message": message.into(),
            "timestamp": self.ctx.clock.now_millis(),
        })
    }

    /// Handle one text frame, returning the replies in order.
    pub fn on_text(&mut self, text: &str) -> (Vec<Value>, Flow) {
        let message: Value = match serde_json::from_str(text) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                return (
                    vec![self.error(codes::PARSE_ERROR, "Invalid message format")],
                    Flow::Continue,
                )
            }
        };

        let Some(kind) = message.get("type").and_then(Value::as_str) else {
            return (
                vec![self.error(codes::INVALID_MESSAGE, "Missing message type")],
                Flow::Continue,
            );
        };

        match kind {
            "auth" => self.on_auth(&message),
            "subscribe" => (self.on_subscription(&message, true), Flow::Continue),
            "unsubscribe" => (self.on_subscription(&message, false), Flow::Continue),
            "ping" => (
                vec![json!({ "type": "pong", "timestamp": self.ctx.clock.now_millis() })],
                Flow::Continue,
            ),
            other => (
                vec![self.error(codes::UNKNOWN_TYPE, format!("Unknown message type: {}", other))],
                Flow::Continue,
            ),
        }
    }

    fn on_auth(&mut self, message: &Value) -> (Vec<Value>, Flow) {
        if self.identity.is_some() {
            return (
                vec![self.error(codes::ALREADY_AUTHENTICATED, "Connection is already authenticated")],
                Flow::Continue,
            );
        }

        let token = message
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty());
        let Some(token) = token else {
            return (
                vec![self.error(codes::AUTH_REQUIRED, "Token required for authentication")],
                Flow::Continue,
            );
        };

        let identity = match self.ctx.issuer.verify(token) {
            TokenVerdict::Valid(identity) => identity,
            TokenVerdict::Invalid { reason } => {
                debug!(connection_id = %self.handle.id(), reason = %reason, "WebSocket token rejected");
                return (vec![self.error(codes::INVALID_TOKEN, reason)], Flow::Close);
            }
            TokenVerdict::Expired => {
                return (
                    vec![self.error(codes::EXPIRED_TOKEN, "Token has expired")],
                    Flow::Close,
                )
            }
        };

        if !identity.has_permission(perms::WEBSOCKET_CONNECT) {
            debug!(client_id = %identity.client_id, "WebSocket connect permission missing");
            return (
                vec![self.error(
                    codes::FORBIDDEN,
                    format!("Missing permission: {}", perms::WEBSOCKET_CONNECT),
                )],
                Flow::Close,
            );
        }

        if !self.ctx.sessions.register(self.handle.clone(), identity.clone()) {
            return (
                vec![self.error(codes::MAX_CONNECTIONS, "Maximum WebSocket connections reached")],
                Flow::Close,
            );
        }

        info!(
            connection_id = %self.handle.id(),
            client_id = %identity.client_id,
            "WebSocket authenticated"
        );
        let reply = json!({
            "type": "auth_success",
            "clientId": identity.client_id,
            "expiresIn": identity.expires_in(self.ctx.clock.now_secs()),
        });
        self.identity = Some(identity);
        (vec![reply], Flow::Continue)
    }

    fn on_subscription(&self, message: &Value, subscribe: bool) -> Vec<Value> {
        let id = self.handle.id();
        let identity = match &self.identity {
            Some(identity) if self.ctx.sessions.contains(id) => identity,
            _ => return vec![self.error(codes::NOT_AUTHENTICATED, "Authenticate first")],
        };

        let Some(events) = message.get("events").and_then(Value::as_array) else {
            return vec![self.error(codes::MISSING_FIELD, "events field required")];
        };

        let mut replies = Vec::new();
        for event in events {
            let Some(topic) = event.as_str().filter(|t| !t.is_empty()) else {
                replies.push(self.error(codes::INVALID_FIELD, "Event names must be non-empty strings"));
                continue;
            };

            if !subscribe {
                self.ctx.sessions.unsubscribe(id, topic);
                continue;
            }

            let required = topic_permission(topic);
            if !identity.has_permission(required) {
                debug!(client_id = %identity.client_id, topic, required, "Subscription denied");
                replies.push(self.error(
                    codes::FORBIDDEN,
                    format!("No permission to subscribe to: {}", topic),
                ));
                continue;
            }
            self.ctx.sessions.subscribe(id, topic);
        }

        replies.push(json!({
            "type": if subscribe { "subscribed" } else { "unsubscribed" },
            "events": self.ctx.sessions.topics_of(id).unwrap_or_default(),
        }));
        replies
    }
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    evicted: Arc<Notify>,
    ping_interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
            _ = evicted.notified() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

/// Drive one upgraded socket until either side closes.
pub async fn serve(socket: WebSocket, ctx: Arc<WsContext>) {
    let (handle, outbound) = ConnectionHandle::new(ctx.config.outbound_queue);
    let id = handle.id();
    let (sink, mut stream) = socket.split();
    debug!(connection_id = %id, "WebSocket connected");

    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound,
        handle.eviction_signal(),
        ctx.config.ping_interval,
    ));
    let mut writer_done = false;
    let mut connection = WsConnection::new(handle.clone(), ctx.clone());

    'read: loop {
        let text = tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "WebSocket read failed");
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        };

        let (replies, flow) = connection.on_text(&text);
        for reply in replies {
            if !handle.send(reply.to_string().into()).await {
                break 'read;
            }
        }
        if flow == Flow::Close {
            break;
        }
    }

    ctx.sessions.remove(id);
    let client_id = connection.identity().map(|i| i.client_id.clone());
    // last senders; the writer drains what is queued and closes
    drop(connection);
    drop(handle);
    if !writer_done && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(connection_id = %id, client_id = client_id.as_deref().unwrap_or("-"), "WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::JwtConfig;
    use crate::domain::identity::ClientCredential;
    use crate::domain::permissions::PermissionSet;
    use crate::middleware::GatewayMetrics;
    use crate::ports::outbound::ManualClock;
    use crate::security::tokens::SigningKeys;

    const START_MS: u64 = 1_700_000_000_000;

    struct Fixture {
        ctx: Arc<WsContext>,
        clock: Arc<ManualClock>,
    }

    fn fixture(max_connections: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new(START_MS));
        let issuer = CredentialIssuer::new(SigningKeys::generate(), &JwtConfig::default(), clock.clone())
            .unwrap();
        let ctx = Arc::new(WsContext {
            sessions: Arc::new(SessionRegistry::new(
                max_connections,
                Arc::new(GatewayMetrics::new()),
                clock.clone(),
            )),
            issuer: Arc::new(issuer),
            clock: clock.clone(),
            config: WebSocketConfig::default(),
        });
        Fixture { ctx, clock }
    }

    impl Fixture {
        fn connection(&self) -> (WsConnection, mpsc::Receiver<Frame>) {
            let (handle, rx) = ConnectionHandle::new(16);
            (WsConnection::new(handle, self.ctx.clone()), rx)
        }

        fn token(&self, permissions: &[&str]) -> String {
            let credential = ClientCredential {
                id: "dashboard".into(),
                secret_hash: String::new(),
                description: String::new(),
                permissions: PermissionSet::new(permissions.iter().copied()),
                enabled: true,
            };
            self.ctx.issuer.issue(&credential).unwrap().token
        }

        fn authed(&self, permissions: &[&str]) -> (WsConnection, mpsc::Receiver<Frame>) {
            let (mut conn, rx) = self.connection();
            let (replies, flow) = conn.on_text(&auth(&self.token(permissions)));
            assert_eq!(replies[0]["type"], "auth_success");
            assert_eq!(flow, Flow::Continue);
            (conn, rx)
        }
    }

    fn auth(token: &str) -> String {
        json!({ "type": "auth", "token": token }).to_string()
    }

    fn single(result: (Vec<Value>, Flow)) -> (Value, Flow) {
        let (mut replies, flow) = result;
        assert_eq!(replies.len(), 1, "{:?}", replies);
        (replies.remove(0), flow)
    }

    #[test]
    fn test_topic_permissions() {
        for (topic, perm) in [
            ("player.join", perms::WEBSOCKET_SUBSCRIBE_PLAYERS),
            ("player.leave", perms::WEBSOCKET_SUBSCRIBE_PLAYERS),
            ("player.*", perms::WEBSOCKET_SUBSCRIBE_PLAYERS),
            ("player.gamemode", perms::WEBSOCKET_SUBSCRIBE_PLAYERS),
            ("player.chat", perms::WEBSOCKET_SUBSCRIBE_CHAT),
            ("chat.*", perms::WEBSOCKET_SUBSCRIBE_CHAT),
            ("server.status", perms::WEBSOCKET_SUBSCRIBE_STATUS),
            ("server.*", perms::WEBSOCKET_SUBSCRIBE_STATUS),
            ("server.log", perms::WEBSOCKET_SUBSCRIBE_LOGS),
            ("server.logs", perms::WEBSOCKET_SUBSCRIBE_LOGS),
            ("logs.*", perms::WEBSOCKET_SUBSCRIBE_LOGS),
            ("*", perms::WEBSOCKET_SUBSCRIBE_ALL),
            ("entity.remove", perms::WEBSOCKET_SUBSCRIBE_ALL),
        ] {
            assert_eq!(topic_permission(topic), perm, "{}", topic);
        }
    }

    #[test]
    fn test_malformed_frames() {
        let f = fixture(4);
        let (mut conn, _rx) = f.connection();

        let (reply, flow) = single(conn.on_text("{not json"));
        assert_eq!(reply["code"], codes::PARSE_ERROR);
        assert_eq!(flow, Flow::Continue);

        let (reply, _) = single(conn.on_text(r#"{"token":"x"}"#));
        assert_eq!(reply["code"], codes::INVALID_MESSAGE);

        let (reply, _) = single(conn.on_text(r#"{"type":"dance"}"#));
        assert_eq!(reply["code"], codes::UNKNOWN_TYPE);
        assert_eq!(reply["message"], "Unknown message type: dance");
        assert_eq!(reply["timestamp"], START_MS);
    }

    #[test]
    fn test_ping_before_auth() {
        let f = fixture(4);
        let (mut conn, _rx) = f.connection();
        let (reply, flow) = single(conn.on_text(r#"{"type":"ping"}"#));
        assert_eq!(reply["type"], "pong");
        assert_eq!(reply["timestamp"], START_MS);
        assert_eq!(flow, Flow::Continue);
    }

    #[test]
    fn test_subscribe_requires_auth() {
        let f = fixture(4);
        let (mut conn, _rx) = f.connection();
        let (reply, _) = single(conn.on_text(r#"{"type":"subscribe","events":["player.join"]}"#));
        assert_eq!(reply["code"], codes::NOT_AUTHENTICATED);
    }

    #[test]
    fn test_auth_outcomes() {
        let f = fixture(4);

        let (mut conn, _rx) = f.connection();
        let (reply, flow) = single(conn.on_text(r#"{"type":"auth"}"#));
        assert_eq!(reply["code"], codes::AUTH_REQUIRED);
        assert_eq!(flow, Flow::Continue);

        let (reply, flow) = single(conn.on_text(&auth("garbage")));
        assert_eq!(reply["code"], codes::INVALID_TOKEN);
        assert_eq!(flow, Flow::Close);

        let (mut conn, _rx) = f.connection();
        let (reply, flow) = single(conn.on_text(&auth(&f.token(&["api.players.read"]))));
        assert_eq!(reply["code"], codes::FORBIDDEN);
        assert_eq!(flow, Flow::Close);
        assert_eq!(f.ctx.sessions.connection_count(), 0);

        let token = f.token(&["api.websocket.*"]);
        f.clock.advance(Duration::from_secs(4000));
        let (mut conn, _rx) = f.connection();
        let (reply, flow) = single(conn.on_text(&auth(&token)));
        assert_eq!(reply["code"], codes::EXPIRED_TOKEN);
        assert_eq!(flow, Flow::Close);
    }

    #[test]
    fn test_auth_success() {
        let f = fixture(4);
        let (mut conn, _rx) = f.connection();
        let (reply, _) = single(conn.on_text(&auth(&f.token(&["api.websocket.connect"]))));
        assert_eq!(reply["type"], "auth_success");
        assert_eq!(reply["clientId"], "dashboard");
        assert_eq!(reply["expiresIn"], 3600);
        assert_eq!(f.ctx.sessions.connection_count(), 1);

        let (reply, flow) = single(conn.on_text(&auth(&f.token(&["*"]))));
        assert_eq!(reply["code"], codes::ALREADY_AUTHENTICATED);
        assert_eq!(flow, Flow::Continue);
        assert_eq!(f.ctx.sessions.connection_count(), 1);
    }

    #[test]
    fn test_connection_cap() {
        let f = fixture(1);
        let _first = f.authed(&["api.websocket.connect"]);
        let (mut conn, _rx) = f.connection();
        let (reply, flow) = single(conn.on_text(&auth(&f.token(&["api.websocket.connect"]))));
        assert_eq!(reply["code"], codes::MAX_CONNECTIONS);
        assert_eq!(flow, Flow::Close);
    }

    #[test]
    fn test_subscribe_checks_each_topic() {
        let f = fixture(4);
        let (mut conn, mut rx) = f.authed(&[
            "api.websocket.connect",
            "api.websocket.subscribe.players",
        ]);

        let (replies, _) = conn.on_text(
            r#"{"type":"subscribe","events":["player.leave","server.status","player.join"]}"#,
        );
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["code"], codes::FORBIDDEN);
        assert_eq!(replies[0]["message"], "No permission to subscribe to: server.status");
        assert_eq!(replies[1]["type"], "subscribed");
        assert_eq!(replies[1]["events"], json!(["player.join", "player.leave"]));

        assert_eq!(f.ctx.sessions.broadcast("player.join", &json!({})), 1);
        assert_eq!(f.ctx.sessions.broadcast("server.status", &json!({})), 0);
        assert!(rx.try_recv().is_ok());

        let (reply, _) = single(conn.on_text(r#"{"type":"unsubscribe","events":["player.join"]}"#));
        assert_eq!(reply["type"], "unsubscribed");
        assert_eq!(reply["events"], json!(["player.leave"]));
    }

    #[test]
    fn test_subscribe_without_events() {
        let f = fixture(4);
        let (mut conn, _rx) = f.authed(&["api.websocket.*"]);
        let (reply, _) = single(conn.on_text(r#"{"type":"subscribe"}"#));
        assert_eq!(reply["code"], codes::MISSING_FIELD);
    }
}
