//! API Gateway service - axum wiring, background tasks and shutdown.
//!
//! One listener carries both surfaces: the WebSocket upgrade at
//! `websocket.path` and everything else as a fallback into
//! [`GatewayRouter`].

use crate::domain::config::{GatewayConfig, LoggingConfig};
use crate::domain::error::GatewayError;
use crate::middleware::{
    create_cors_layer, rate_limit, uniform_rejection, GatewayMetrics, RateLimiter, TracingLayer,
};
use crate::ports::outbound::{HostFacade, SystemTimeSource, TimeSource};
use crate::router::GatewayRouter;
use crate::security::tokens::{CredentialIssuer, SigningKeys};
use crate::ws::{self, EventPublisher, LogBroadcastLayer, SessionRegistry, WsContext};
use axum::{
    extract::{connect_info::ConnectInfo, ws::WebSocketUpgrade, Request, State},
    middleware::map_response,
    response::Response,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: `RUST_LOG` or the configured level, plain
/// or JSON output, and optionally log forwarding to `server.log`.
pub fn init_tracing(
    config: &LoggingConfig,
    sessions: Option<Arc<SessionRegistry>>,
) -> Result<(), GatewayError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| GatewayError::Internal(format!("log filter: {}", e)))?;

    let broadcast = sessions
        .filter(|_| config.broadcast_logs)
        .map(LogBroadcastLayer::new);

    let registry = tracing_subscriber::registry().with(env_filter).with(broadcast);
    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| GatewayError::Internal(format!("tracing init: {}", e)))
}

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayRouter>,
    ws: Arc<WsContext>,
}

/// The embedded gateway.
pub struct ApiGatewayService {
    config: GatewayConfig,
    gateway: Arc<GatewayRouter>,
    ws: Arc<WsContext>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<GatewayMetrics>,
    host: Arc<dyn HostFacade>,
    shutdown_tx: watch::Sender<bool>,
}

impl ApiGatewayService {
    /// Validate `config`, load or create the signing key at `jwt.key_path`,
    /// and build every component.
    pub fn new(config: GatewayConfig, host: Arc<dyn HostFacade>) -> Result<Self, GatewayError> {
        config.validate()?;
        let keys = SigningKeys::load_or_generate(&config.jwt.key_path)?;
        Self::with_parts(config, host, keys, Arc::new(SystemTimeSource))
    }

    /// Build from explicit key material and clock.
    pub fn with_parts(
        config: GatewayConfig,
        host: Arc<dyn HostFacade>,
        keys: SigningKeys,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let metrics = Arc::new(GatewayMetrics::new());
        let issuer = Arc::new(CredentialIssuer::new(keys, &config.jwt, clock.clone())?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            config.websocket.max_connections,
            metrics.clone(),
            clock.clone(),
        ));

        let gateway = Arc::new(GatewayRouter::new(
            &config,
            issuer.clone(),
            limiter.clone(),
            metrics.clone(),
            host.clone(),
            clock.clone(),
        ));
        let ws = Arc::new(WsContext {
            sessions,
            issuer,
            clock,
            config: config.websocket.clone(),
        });

        info!(
            clients = gateway.clients().len(),
            routes = gateway.routes().len(),
            key_id = %ws.issuer.key_id(),
            "API Gateway configured"
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            gateway,
            ws,
            limiter,
            metrics,
            host,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.ws.sessions)
    }

    pub fn issuer(&self) -> Arc<CredentialIssuer> {
        Arc::clone(&self.ws.issuer)
    }

    /// Handle the host uses to push events to WebSocket subscribers.
    pub fn events(&self) -> EventPublisher {
        EventPublisher::new(self.sessions())
    }

    /// The complete axum application.
    ///
    /// CORS is outermost so preflight skips everything and every response,
    /// including body-limit and timeout rejections, carries the headers.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            ws: Arc::clone(&self.ws),
        };

        let mut app = Router::new();
        if self.config.websocket.enabled {
            app = app.route(
                &self.config.websocket.path,
                get(upgrade).fallback(rest_fallback),
            );
        }

        let max_body_size = self.config.http.max_body_size;
        app.fallback(rest_fallback)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(max_body_size))
            .layer(TimeoutLayer::new(self.config.http.request_timeout))
            .layer(map_response(move |response: Response| async move {
                uniform_rejection(response, max_body_size)
            }))
            .layer(TracingLayer::new())
            .layer(create_cors_layer(&self.config.cors))
    }

    /// Bind `http.host:http.port` and serve until [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.config.http_addr()).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until [`shutdown`](Self::shutdown).
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        let tasks = self.spawn_background_tasks();
        info!(addr = %addr, websocket = self.config.websocket.enabled, "API Gateway listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let sessions = self.sessions();
        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                // sender dropped: nobody can ask for shutdown any more
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            let closed = sessions.disconnect_all();
            info!(closed, "Shutting down API Gateway");
        })
        .await;

        for task in tasks {
            task.abort();
        }

        match result {
            Ok(()) => {
                info!("API Gateway stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "API Gateway server error");
                Err(GatewayError::Bind(e))
            }
        }
    }

    /// Trigger graceful shutdown. Safe to call before `start`.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if self.config.rate_limit.enabled {
            tasks.push(tokio::spawn(rate_limit::cleanup_task(
                Arc::clone(&self.limiter),
                self.config.rate_limit.cleanup_interval,
            )));
        }

        if self.config.websocket.enabled {
            tasks.push(tokio::spawn(ws::status_broadcast_task(
                Arc::clone(&self.host),
                self.sessions(),
                self.config.websocket.status_broadcast_interval,
            )));
        }

        tasks
    }
}

async fn rest_fallback(State(state): State<AppState>, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    state.gateway.handle(request, peer).await
}

async fn upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let ctx = state.ws;
    upgrade
        .max_message_size(ctx.config.max_message_size)
        .on_upgrade(move |socket| ws::serve(socket, ctx))
}
