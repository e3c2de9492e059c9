//! # WebSocket Flows
//!
//! In-band authentication, permission-checked subscriptions, event fan-out
//! and connection limits against a live listener.

#[cfg(test)]
mod tests {
    use crate::support::{closed_by_server, next_json, send_json, test_config, RunningGateway};
    use api_gateway::GatewayEvent;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribe_and_receive_player_events() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let (mut socket, reply) = gateway.websocket_as("viewer").await;
        assert_eq!(reply["type"], "auth_success");
        assert_eq!(reply["clientId"], "viewer");
        assert!(reply["expiresIn"].as_u64().is_some_and(|s| s > 0 && s <= 3600));

        send_json(
            &mut socket,
            json!({ "type": "subscribe", "events": ["player.join", "server.status"] }),
        )
        .await;
        let denied = next_json(&mut socket).await.unwrap();
        assert_eq!(denied["type"], "error");
        assert_eq!(denied["code"], "FORBIDDEN");
        assert_eq!(denied["message"], "No permission to subscribe to: server.status");
        let subscribed = next_json(&mut socket).await.unwrap();
        assert_eq!(subscribed["type"], "subscribed");
        assert_eq!(subscribed["events"], json!(["player.join"]));

        let reached = gateway.service.events().emit(&GatewayEvent::PlayerJoin {
            uuid: "u-steve".into(),
            name: "steve".into(),
            world: "overworld".into(),
        });
        assert_eq!(reached, 1);

        let event = next_json(&mut socket).await.unwrap();
        assert_eq!(event["type"], "player.join");
        assert_eq!(event["data"]["name"], "steve");
        assert!(event["timestamp"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_protocol_before_auth() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let mut socket = gateway.websocket().await;

        send_json(&mut socket, json!({ "type": "subscribe", "events": ["player.join"] })).await;
        let reply = next_json(&mut socket).await.unwrap();
        assert_eq!(reply["code"], "NOT_AUTHENTICATED");

        send_json(&mut socket, json!({ "type": "auth" })).await;
        let reply = next_json(&mut socket).await.unwrap();
        assert_eq!(reply["code"], "AUTH_REQUIRED");

        // still open
        send_json(&mut socket, json!({ "type": "ping" })).await;
        let reply = next_json(&mut socket).await.unwrap();
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn test_connect_permission_required() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let (mut socket, reply) = gateway.websocket_as("reader").await;
        assert_eq!(reply["code"], "FORBIDDEN");
        assert_eq!(reply["message"], "Missing permission: api.websocket.connect");
        assert!(closed_by_server(&mut socket).await);
        assert!(gateway.service.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_token_closes() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let mut socket = gateway.websocket().await;
        send_json(&mut socket, json!({ "type": "auth", "token": "forged" })).await;
        let reply = next_json(&mut socket).await.unwrap();
        assert_eq!(reply["code"], "INVALID_TOKEN");
        assert!(closed_by_server(&mut socket).await);
    }

    #[tokio::test]
    async fn test_connection_cap() {
        let mut config = test_config();
        config.websocket.max_connections = 1;
        let gateway = RunningGateway::spawn(config).await;

        let (_first, reply) = gateway.websocket_as("viewer").await;
        assert_eq!(reply["type"], "auth_success");

        let (mut second, reply) = gateway.websocket_as("admin").await;
        assert_eq!(reply["code"], "MAX_CONNECTIONS");
        assert!(closed_by_server(&mut second).await);
        assert_eq!(gateway.service.sessions().connection_count(), 1);
    }

    #[tokio::test]
    async fn test_client_close_releases_slot() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let (mut socket, _) = gateway.websocket_as("admin").await;
        assert_eq!(gateway.service.sessions().connection_count(), 1);

        socket.close(None).await.unwrap();
        drop(socket);

        let sessions = gateway.service.sessions();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sessions.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session released");
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_sessions() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let (mut socket, reply) = gateway.websocket_as("admin").await;
        assert_eq!(reply["type"], "auth_success");

        gateway.service.shutdown();
        assert!(closed_by_server(&mut socket).await);
        assert!(gateway.service.sessions().is_empty());
    }
}
