//! Shared fixtures: a scripted host and a gateway bound to an ephemeral port.

use api_gateway::domain::config::ClientConfig;
use api_gateway::ports::outbound::SystemTimeSource;
use api_gateway::{ApiGatewayService, GatewayConfig, HostError, HostFacade, HostRequest, SigningKeys};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const SECRET: &str = "correct-horse";

/// Host with two online players and a recording console.
#[derive(Default)]
pub struct ScriptedHost {
    pub commands: Mutex<Vec<String>>,
    pub kicked: Mutex<Vec<(String, String)>>,
}

impl ScriptedHost {
    fn player(name: &str) -> Option<Value> {
        match name {
            "steve" => Some(json!({ "name": "steve", "uuid": "u-steve", "world": "overworld" })),
            "alex" => Some(json!({ "name": "alex", "uuid": "u-alex", "world": "nether" })),
            _ => None,
        }
    }
}

#[async_trait]
impl HostFacade for ScriptedHost {
    async fn find_player(&self, player: &str) -> Result<Option<Value>, HostError> {
        Ok(Self::player(player))
    }

    async fn execute_command(&self, command: &str) -> Result<String, HostError> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        Ok(format!("ran {}", command))
    }

    async fn broadcast_message(&self, _message: &str) -> Result<usize, HostError> {
        Ok(2)
    }

    async fn kick_player(&self, player: &str, reason: &str) -> Result<(), HostError> {
        if let Ok(mut kicked) = self.kicked.lock() {
            kicked.push((player.to_string(), reason.to_string()));
        }
        Ok(())
    }

    async fn server_status(&self) -> Result<Value, HostError> {
        Ok(json!({ "online": true, "players": 2, "maxPlayers": 20 }))
    }

    async fn query(&self, request: HostRequest) -> Result<Value, HostError> {
        match request {
            HostRequest::ListPlayers => Ok(json!([
                Self::player("steve"),
                Self::player("alex"),
            ])),
            HostRequest::ListWorlds => Ok(json!(["overworld", "nether"])),
            other => Err(HostError::NotImplemented(other.name().into())),
        }
    }
}

fn client(id: &str, permissions: &[&str], enabled: bool) -> ClientConfig {
    ClientConfig {
        id: id.into(),
        secret_hash: bcrypt::hash(SECRET, 4).unwrap_or_default(),
        description: format!("{} test client", id),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        enabled,
    }
}

/// Clients: `admin` (everything), `viewer` (players and player events),
/// `reader` (players only, no WebSocket), `retired` (disabled).
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        clients: vec![
            client("admin", &["*"], true),
            client(
                "viewer",
                &[
                    "api.players.read",
                    "api.websocket.connect",
                    "api.websocket.subscribe.players",
                ],
                true,
            ),
            client("reader", &["api.players.read"], true),
            client("retired", &["*"], false),
        ],
        ..GatewayConfig::default()
    }
}

/// A gateway serving on `127.0.0.1:<ephemeral>`.
pub struct RunningGateway {
    pub addr: SocketAddr,
    pub service: Arc<ApiGatewayService>,
    pub host: Arc<ScriptedHost>,
    pub server: JoinHandle<Result<(), api_gateway::GatewayError>>,
    http: reqwest::Client,
}

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl RunningGateway {
    pub async fn spawn(config: GatewayConfig) -> Self {
        let host = Arc::new(ScriptedHost::default());
        let service = Arc::new(
            ApiGatewayService::with_parts(
                config,
                host.clone(),
                SigningKeys::generate(),
                Arc::new(SystemTimeSource),
            )
            .expect("gateway config"),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let serving = service.clone();
        let server = tokio::spawn(async move { serving.serve(listener).await });

        Self {
            addr,
            service,
            host,
            server,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange `client`'s credentials for a bearer token.
    pub async fn token(&self, client: &str) -> String {
        let body: Value = self
            .http
            .post(self.url("/auth/token"))
            .json(&json!({ "clientId": client, "secret": SECRET }))
            .send()
            .await
            .expect("token request")
            .json()
            .await
            .expect("token body");
        body["access_token"]
            .as_str()
            .expect("access_token")
            .to_string()
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.http.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("request")
    }

    pub async fn websocket(&self) -> WsClient {
        let url = format!("ws://{}{}", self.addr, self.service.config().websocket.path);
        let (socket, _) = connect_async(url).await.expect("websocket connect");
        socket
    }

    /// Connect and authenticate as `client`, returning the socket and the
    /// `auth_success` frame.
    pub async fn websocket_as(&self, client: &str) -> (WsClient, Value) {
        let token = self.token(client).await;
        let mut socket = self.websocket().await;
        send_json(&mut socket, json!({ "type": "auth", "token": token })).await;
        let reply = next_json(&mut socket).await.expect("auth reply");
        (socket, reply)
    }
}

pub async fn send_json(socket: &mut WsClient, message: Value) {
    socket
        .send(Message::Text(message.to_string().into()))
        .await
        .expect("websocket send");
}

/// Next JSON text frame, skipping control frames. `None` once the server
/// closes or nothing arrives within five seconds.
pub async fn next_json(socket: &mut WsClient) -> Option<Value> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).ok(),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Binary(_))) => continue,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Whether the server closes the socket within five seconds.
pub async fn closed_by_server(socket: &mut WsClient) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false)
}
