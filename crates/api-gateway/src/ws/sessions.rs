//! Live WebSocket sessions and their topic subscriptions.
//!
//! Two concurrent maps are kept in lockstep: sessions by connection, and a
//! topic index of subscribers. A guard on one map is never held while the
//! other is locked.
//!
//! Delivery never waits on a peer. Each connection owns a bounded outbound
//! queue; a broadcast that finds it full evicts that session.

use crate::domain::correlation::ConnectionId;
use crate::domain::identity::Identity;
use crate::middleware::GatewayMetrics;
use crate::ports::outbound::TimeSource;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

/// Universal subscription: every topic.
pub const ALL_TOPICS: &str = "*";

/// A serialized JSON text frame, shared between recipients.
pub type Frame = Arc<str>;

/// Write side of one connection, held by the registry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    evicted: Arc<Notify>,
}

impl ConnectionHandle {
    /// A handle and the receiving end of its outbound queue.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            evicted: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame, waiting for room. Used for direct replies.
    pub async fn send(&self, frame: Frame) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Notified once the registry has evicted this connection. Holding the
    /// signal does not keep the outbound queue open.
    pub fn eviction_signal(&self) -> Arc<Notify> {
        self.evicted.clone()
    }
}

struct Session {
    identity: Identity,
    topics: HashSet<String>,
    handle: ConnectionHandle,
}

/// Every topic key that delivers `topic`: itself, `*`, and each `prefix.*`.
fn subscription_keys(topic: &str) -> Vec<String> {
    let mut keys = vec![topic.to_string(), ALL_TOPICS.to_string()];
    keys.extend(
        topic
            .match_indices('.')
            .map(|(i, _)| format!("{}.*", &topic[..i])),
    );
    keys
}

pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
    topics: DashMap<String, HashSet<ConnectionId>>,
    live: AtomicUsize,
    max_connections: usize,
    metrics: Arc<GatewayMetrics>,
    clock: Arc<dyn TimeSource>,
}

impl SessionRegistry {
    pub fn new(
        max_connections: usize,
        metrics: Arc<GatewayMetrics>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            topics: DashMap::new(),
            live: AtomicUsize::new(0),
            max_connections,
            metrics,
            clock,
        }
    }

    /// Register an authenticated connection. `false` when the registry is
    /// full or the connection is already registered.
    pub fn register(&self, handle: ConnectionHandle, identity: Identity) -> bool {
        let max = self.max_connections;
        if self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_err()
        {
            info!(client_id = %identity.client_id, max, "WebSocket connection limit reached");
            return false;
        }

        let id = handle.id;
        let client_id = identity.client_id.clone();
        let inserted = match self.sessions.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Session {
                    identity,
                    topics: HashSet::new(),
                    handle,
                });
                true
            }
        };

        if inserted {
            self.metrics.record_ws_connect();
            debug!(connection_id = %id, client_id = %client_id, "Session registered");
        } else {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        inserted
    }

    /// Drop a session and all of its subscriptions. Idempotent.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return false;
        };
        for topic in &session.topics {
            self.unindex(topic, id);
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.metrics.record_ws_disconnect();
        debug!(connection_id = %id, client_id = %session.identity.client_id, "Session removed");
        true
    }

    fn unindex(&self, topic: &str, id: ConnectionId) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(&id);
        }
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
    }

    /// Add a topic. No-op (returns `false`) without a registered session.
    pub fn subscribe(&self, id: ConnectionId, topic: &str) -> bool {
        match self.sessions.get_mut(&id) {
            Some(mut session) => {
                session.topics.insert(topic.to_string());
            }
            None => return false,
        }
        self.topics.entry(topic.to_string()).or_default().insert(id);

        // lost a race with remove(): undo the index entry
        if !self.sessions.contains_key(&id) {
            self.unindex(topic, id);
            return false;
        }
        true
    }

    /// Remove a topic. No-op without a registered session.
    pub fn unsubscribe(&self, id: ConnectionId, topic: &str) -> bool {
        let removed = match self.sessions.get_mut(&id) {
            Some(mut session) => session.topics.remove(topic),
            None => return false,
        };
        if removed {
            self.unindex(topic, id);
        }
        true
    }

    /// Deliver `{type: topic, data, timestamp}` to every matching session.
    /// Returns the number of sessions the frame was queued for.
    pub fn broadcast(&self, topic: &str, data: &Value) -> usize {
        let mut recipients = HashSet::new();
        for key in subscription_keys(topic) {
            if let Some(subscribers) = self.topics.get(&key) {
                recipients.extend(subscribers.iter().copied());
            }
        }
        if recipients.is_empty() {
            return 0;
        }

        let frame: Frame = json!({
            "type": topic,
            "data": data,
            "timestamp": self.clock.now_millis(),
        })
        .to_string()
        .into();

        let mut delivered = 0;
        for id in recipients {
            let Some(handle) = self.sessions.get(&id).map(|s| s.handle.clone()) else {
                continue;
            };
            match handle.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    info!(connection_id = %id, topic, "Outbound queue full, evicting session");
                    self.metrics.record_ws_dropped();
                    self.metrics.record_ws_eviction();
                    self.remove(id);
                    handle.evicted.notify_one();
                }
                Err(TrySendError::Closed(_)) => {
                    self.remove(id);
                }
            }
        }

        self.metrics.record_ws_sent(delivered as u64);
        debug!(topic, delivered, "Broadcast");
        delivered
    }

    /// Evict every session and signal each connection to close.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;
        for id in ids {
            let handle = self.sessions.get(&id).map(|s| s.handle.clone());
            if let Some(handle) = handle {
                if self.remove(id) {
                    handle.evicted.notify_one();
                    closed += 1;
                }
            }
        }
        closed
    }

    /// The session's topics, sorted.
    pub fn topics_of(&self, id: ConnectionId) -> Option<Vec<String>> {
        self.sessions.get(&id).map(|session| {
            let mut topics: Vec<String> = session.topics.iter().cloned().collect();
            topics.sort();
            topics
        })
    }

    pub fn identity_of(&self, id: ConnectionId) -> Option<Identity> {
        self.sessions.get(&id).map(|s| s.identity.clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.connection_count() == 0
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permissions::PermissionSet;
    use crate::ports::outbound::ManualClock;

    fn registry(max: usize) -> SessionRegistry {
        SessionRegistry::new(
            max,
            Arc::new(GatewayMetrics::new()),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    fn identity() -> Identity {
        Identity {
            client_id: "dash".into(),
            permissions: PermissionSet::new(["*"]),
            issued_at: 0,
            expires_at: u64::MAX,
            token_id: "t".into(),
        }
    }

    fn connect(registry: &SessionRegistry, capacity: usize) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (handle, rx) = ConnectionHandle::new(capacity);
        let id = handle.id();
        assert!(registry.register(handle, identity()));
        (id, rx)
    }

    fn frame(rx: &mut mpsc::Receiver<Frame>) -> Option<Value> {
        rx.try_recv().ok().map(|f| serde_json::from_str(&f).unwrap())
    }

    #[test]
    fn test_subscription_keys() {
        assert_eq!(
            subscription_keys("player.join"),
            vec!["player.join", "*", "player.*"]
        );
        assert_eq!(
            subscription_keys("a.b.c"),
            vec!["a.b.c", "*", "a.*", "a.b.*"]
        );
        assert_eq!(subscription_keys("plain"), vec!["plain", "*"]);
    }

    #[test]
    fn test_connection_cap() {
        let registry = registry(2);
        connect(&registry, 4);
        connect(&registry, 4);

        let (handle, _rx) = ConnectionHandle::new(4);
        assert!(!registry.register(handle, identity()));
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = registry(4);
        let (handle, _rx) = ConnectionHandle::new(4);
        assert!(registry.register(handle.clone(), identity()));
        assert!(!registry.register(handle, identity()));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_wildcard_delivery() {
        let registry = registry(4);
        let (id, mut rx) = connect(&registry, 8);
        registry.subscribe(id, "player.*");

        assert_eq!(registry.broadcast("player.join", &json!({"name": "steve"})), 1);
        assert_eq!(registry.broadcast("player.chat", &json!({})), 1);
        assert_eq!(registry.broadcast("server.status", &json!({})), 0);

        let first = frame(&mut rx).unwrap();
        assert_eq!(first["type"], "player.join");
        assert_eq!(first["data"]["name"], "steve");
        assert_eq!(first["timestamp"], 1_000);
        assert_eq!(frame(&mut rx).unwrap()["type"], "player.chat");
        assert!(frame(&mut rx).is_none());
    }

    #[test]
    fn test_universal_subscription_delivers_once() {
        let registry = registry(4);
        let (id, mut rx) = connect(&registry, 8);
        registry.subscribe(id, "*");
        registry.subscribe(id, "server.status");
        registry.subscribe(id, "server.*");

        assert_eq!(registry.broadcast("server.status", &json!(null)), 1);
        assert!(frame(&mut rx).is_some());
        assert!(frame(&mut rx).is_none());
    }

    #[test]
    fn test_removed_session_gets_nothing() {
        let registry = registry(4);
        let (id, mut rx) = connect(&registry, 8);
        registry.subscribe(id, "player.join");

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.broadcast("player.join", &json!({})), 0);
        assert!(frame(&mut rx).is_none());
        assert!(registry.topics.is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_disconnect_all_signals_connections() {
        let registry = registry(4);
        let (handle, _rx) = ConnectionHandle::new(4);
        let signal = handle.eviction_signal();
        assert!(registry.register(handle, identity()));
        let (id, _rx2) = connect(&registry, 4);
        registry.subscribe(id, "player.join");

        let mut closed = tokio_test::task::spawn(signal.notified());
        tokio_test::assert_pending!(closed.poll());

        assert_eq!(registry.disconnect_all(), 2);
        assert!(registry.is_empty());
        assert!(registry.topics.is_empty());
        assert!(closed.is_woken());
        tokio_test::assert_ready!(closed.poll());
    }

    #[test]
    fn test_subscribe_without_session_is_noop() {
        let registry = registry(4);
        assert!(!registry.subscribe(ConnectionId::new(), "player.join"));
        assert!(registry.topics.is_empty());
    }

    #[test]
    fn test_unsubscribe_and_sorted_topics() {
        let registry = registry(4);
        let (id, _rx) = connect(&registry, 8);
        for topic in ["server.status", "player.join", "chat.*"] {
            registry.subscribe(id, topic);
        }
        assert_eq!(
            registry.topics_of(id).unwrap(),
            vec!["chat.*", "player.join", "server.status"]
        );

        registry.unsubscribe(id, "player.join");
        assert_eq!(registry.topics_of(id).unwrap(), vec!["chat.*", "server.status"]);
        assert!(!registry.topics.contains_key("player.join"));
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_slow_peer() {
        let registry = registry(4);
        let (slow, _slow_rx) = connect(&registry, 1);
        let (fast, mut fast_rx) = connect(&registry, 8);
        registry.subscribe(slow, "server.status");
        registry.subscribe(fast, "server.status");

        let slow_handle = registry.sessions.get(&slow).unwrap().handle.clone();

        assert_eq!(registry.broadcast("server.status", &json!(1)), 2);
        assert_eq!(registry.broadcast("server.status", &json!(2)), 1);

        assert!(!registry.contains(slow));
        assert!(registry.contains(fast));
        // eviction permit is stored for the connection task
        let signal = slow_handle.eviction_signal();
        tokio::time::timeout(std::time::Duration::from_millis(100), signal.notified())
            .await
            .unwrap();

        assert_eq!(frame(&mut fast_rx).unwrap()["data"], 1);
        assert_eq!(frame(&mut fast_rx).unwrap()["data"], 2);
    }

    #[test]
    fn test_closed_queue_removes_session() {
        let registry = registry(4);
        let (id, rx) = connect(&registry, 4);
        registry.subscribe(id, "player.leave");
        drop(rx);

        assert_eq!(registry.broadcast("player.leave", &json!({})), 0);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_concurrent_remove_and_broadcast() {
        let registry = registry(64);
        let (ids, _receivers): (Vec<_>, Vec<_>) = (0..32)
            .map(|_| {
                let (id, rx) = connect(&registry, 1024);
                registry.subscribe(id, "*");
                (id, rx)
            })
            .unzip();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..100 {
                    registry.broadcast("server.status", &json!({}));
                }
            });
            s.spawn(|| {
                for id in &ids {
                    registry.remove(*id);
                }
            });
        });

        assert_eq!(registry.connection_count(), 0);
        assert!(registry.topics.is_empty());
    }
}
