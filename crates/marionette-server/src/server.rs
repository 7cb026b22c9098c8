//! `MarionetteServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use marionette_core::ConnectionId;
use marionette_rpc::{MethodRegistry, ServiceContext};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::routes::{self, Pages};
use crate::shutdown::ShutdownSignal;
use crate::websocket::Gateway;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Handed to every upgraded connection.
    pub gateway: Gateway,
    /// When the server started.
    pub start_time: Instant,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
}

/// The Marionette server.
#[derive(Debug)]
pub struct MarionetteServer {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    services: Arc<ServiceContext>,
    connections: Arc<ConnectionRegistry>,
    pages: Arc<Pages>,
    shutdown: Arc<ShutdownSignal>,
    start_time: Instant,
}

impl MarionetteServer {
    /// Create a server.
    ///
    /// `connections` must be the registry `services` deregisters from.
    pub fn new(
        config: ServerConfig,
        registry: MethodRegistry,
        services: Arc<ServiceContext>,
        connections: Arc<ConnectionRegistry>,
        pages: Pages,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            services,
            connections,
            pages: Arc::new(pages),
            shutdown: Arc::new(ShutdownSignal::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: Gateway {
                registry: self.registry.clone(),
                services: self.services.clone(),
                connections: self.connections.clone(),
                heartbeat_interval: self.config.heartbeat_interval,
                pong_timeout: self.config.pong_timeout,
                outbound_queue: self.config.outbound_queue,
                shutdown: self.shutdown.token(),
            },
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(state)
            .merge(routes::router(self.pages.clone()))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with an error");
            }
        });
        info!(%addr, "server listening");
        Ok((addr, handle))
    }

    /// The shutdown signal shared with every session.
    pub fn shutdown(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Open connections.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.gateway.connections.connection_count().await;
    Json(health::health_check(
        state.start_time,
        &state.gateway.services.version,
        connections,
    ))
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.gateway.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let id = ConnectionId::new();
    let gateway = state.gateway;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, id, gateway))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use marionette_core::{
        FormatCatalog, InMemoryDataManager, JsonTreeSerializer, LocalManagerFactory,
        StaticAuthProvider,
    };
    use marionette_rpc::{HttpFetcher, default_registry};
    use marionette_settings::ViewSettings;
    use tower::ServiceExt;

    fn make_server(scratch: &std::path::Path) -> MarionetteServer {
        let connections = Arc::new(ConnectionRegistry::new());
        let services = Arc::new(ServiceContext {
            data: Arc::new(InMemoryDataManager::new()),
            formats: Arc::new(FormatCatalog::new(["NeuroML"], ["HDF5"])),
            serializer: Arc::new(JsonTreeSerializer),
            managers: Arc::new(LocalManagerFactory::new(scratch, Vec::new())),
            fetcher: Arc::new(HttpFetcher::new()),
            connections: connections.clone(),
            archive_root: scratch.to_path_buf(),
            version: "2.0.0".into(),
        });
        let pages = Pages::new(
            ViewSettings {
                dir: scratch.to_path_buf(),
                ..ViewSettings::default()
            },
            Arc::new(StaticAuthProvider::default()),
            "https://fallback.test",
        );
        MarionetteServer::new(
            ServerConfig::default(),
            default_registry(),
            services,
            connections,
            pages,
        )
    }

    async fn get(server: &MarionetteServer, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        server.router().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_version_and_connections() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let resp = get(&server, "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["version"], "2.0.0");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn page_routes_are_mounted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dashboard.html"), "dash").unwrap();
        let server = make_server(dir.path());
        assert_eq!(get(&server, "/").await.status(), StatusCode::OK);
        assert_eq!(get(&server, "/tests/unknown").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        assert!(!get(&server, "/ws").await.status().is_success());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        assert_eq!(get(&server, "/nonexistent").await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn registry_holds_every_operation() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        assert!(server.registry().has_method("load_project_from_id"));
        assert!(server.registry().has_method("idle_user"));
    }

    #[tokio::test]
    async fn listen_binds_an_ephemeral_port_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(dir.path());
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
