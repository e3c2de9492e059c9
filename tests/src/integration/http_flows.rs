//! # REST Flows
//!
//! Token issuance, permission checks, rate limiting, admin actions and CORS
//! through the full axum stack.

#[cfg(test)]
mod tests {
    use crate::support::{test_config, RunningGateway, SECRET};
    use api_gateway::domain::config::EndpointLimit;
    use api_gateway::{ApiGatewayService, GatewayConfig};
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use std::sync::Arc;

    // =============================================================================
    // CREDENTIALS
    // =============================================================================

    #[tokio::test]
    async fn test_token_grants_only_its_permissions() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let token = gateway.token("viewer").await;

        let response = gateway.get("/players/steve", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let player: Value = response.json().await.unwrap();
        assert_eq!(player["uuid"], "u-steve");

        let response = gateway.get("/server/status", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INSUFFICIENT_PERMISSIONS");
        assert_eq!(body["message"], "Required permission: api.status.read");
    }

    #[tokio::test]
    async fn test_missing_and_garbage_tokens() {
        let gateway = RunningGateway::spawn(test_config()).await;

        let response = gateway.get("/players", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "MISSING_TOKEN");
        assert_eq!(body["error"], "Unauthorized");

        let response = gateway.get("/players", Some("not.a.token")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_token_endpoint_rejections() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let post = |body: Value| {
            gateway
                .http()
                .post(gateway.url("/auth/token"))
                .json(&body)
                .send()
        };

        let response = post(json!({ "clientId": "viewer", "secret": "wrong" })).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_CREDENTIALS");

        let response = post(json!({ "clientId": "retired", "secret": SECRET })).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "CLIENT_DISABLED");

        let response = post(json!({ "clientId": "viewer" })).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "MISSING_FIELD");
    }

    // =============================================================================
    // RATE LIMITING
    // =============================================================================

    #[tokio::test]
    async fn test_public_route_limited_per_address() {
        let mut config = test_config();
        config
            .rate_limit
            .endpoints
            .insert("/health".into(), EndpointLimit::new(60, 2));
        let gateway = RunningGateway::spawn(config).await;

        for _ in 0..2 {
            let response = gateway.get("/health", None).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = gateway.get("/health", None).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "RATE_LIMITED");
        assert_eq!(body["retryAfter"], 1);
        assert!(gateway.service.metrics().to_json()["rejections"]["rate_limited"]
            .as_u64()
            .is_some_and(|n| n >= 1));
    }

    #[tokio::test]
    async fn test_remaining_header_counts_down() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let token = gateway.token("viewer").await;

        let first = gateway.get("/players", Some(&token)).await;
        let second = gateway.get("/players", Some(&token)).await;
        let remaining = |r: &reqwest::Response| -> u32 {
            r.headers()["x-ratelimit-remaining"]
                .to_str()
                .unwrap()
                .parse()
                .unwrap()
        };
        assert_eq!(remaining(&first), remaining(&second) + 1);
    }

    // =============================================================================
    // ADMIN AND HOST DISPATCH
    // =============================================================================

    #[tokio::test]
    async fn test_admin_command_reaches_host() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let token = gateway.token("admin").await;

        let response = gateway
            .http()
            .post(gateway.url("/admin/command"))
            .bearer_auth(&token)
            .json(&json!({ "command": "/say hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Command executed: say hello");
        assert_eq!(gateway.host.commands.lock().unwrap().as_slice(), ["say hello"]);
    }

    #[tokio::test]
    async fn test_kick_unknown_player() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let token = gateway.token("admin").await;

        let response = gateway
            .http()
            .post(gateway.url("/admin/kick"))
            .bearer_auth(&token)
            .json(&json!({ "player": "herobrine" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "PLAYER_NOT_FOUND");
        assert!(gateway.host.kicked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_host_operation() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let token = gateway.token("admin").await;

        let response = gateway.get("/worlds/overworld/weather", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "FEATURE_NOT_IMPLEMENTED");

        let response = gateway.get("/worlds", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let worlds: Value = response.json().await.unwrap();
        assert_eq!(worlds, json!(["overworld", "nether"]));
    }

    // =============================================================================
    // CORS AND CORRELATION
    // =============================================================================

    #[tokio::test]
    async fn test_preflight_and_request_id() {
        let gateway = RunningGateway::spawn(test_config()).await;

        let response = gateway
            .http()
            .request(reqwest::Method::OPTIONS, gateway.url("/players"))
            .header("Origin", "https://panel.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://panel.example.com"
        );

        let response = gateway
            .http()
            .get(gateway.url("/health"))
            .header("X-Request-ID", "trace-123")
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()["x-request-id"], "trace-123");

        let response = gateway.get("/health", None).await;
        assert!(!response.headers()["x-request-id"].is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_keeps_error_shape() {
        let gateway = RunningGateway::spawn(test_config()).await;
        let padding = "x".repeat(200 * 1024);

        let response = gateway
            .http()
            .post(gateway.url("/auth/token"))
            .header("Origin", "http://dash.example")
            .json(&json!({ "clientId": "viewer", "secret": SECRET, "padding": padding }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://dash.example"
        );
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Payload Too Large");
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

        // same shape and headers as a rejection built by the router
        let response = gateway
            .http()
            .post(gateway.url("/auth/token"))
            .header("Origin", "http://dash.example")
            .json(&json!({ "clientId": "viewer" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "http://dash.example"
        );
    }

    // =============================================================================
    // LIFECYCLE
    // =============================================================================

    #[tokio::test]
    async fn test_key_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            jwt: api_gateway::domain::config::JwtConfig {
                key_path: dir.path().join("gateway.pem"),
                ..Default::default()
            },
            ..test_config()
        };

        let host = Arc::new(crate::support::ScriptedHost::default());
        let first = ApiGatewayService::new(config.clone(), host.clone()).unwrap();
        let token = {
            let credential = api_gateway::domain::identity::ClientCredential {
                id: "viewer".into(),
                secret_hash: String::new(),
                description: String::new(),
                permissions: api_gateway::PermissionSet::new(["api.players.read"]),
                enabled: true,
            };
            first.issuer().issue(&credential).unwrap().token
        };
        drop(first);

        // a token signed before the restart still verifies
        let second = ApiGatewayService::new(config, host).unwrap();
        assert!(matches!(
            second.issuer().verify(&token),
            api_gateway::TokenVerdict::Valid(_)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving() {
        let gateway = RunningGateway::spawn(test_config()).await;
        assert_eq!(gateway.get("/health", None).await.status(), StatusCode::OK);

        gateway.service.shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), gateway.server)
            .await
            .expect("server stops")
            .expect("server task");
        assert!(result.is_ok());
    }
}
