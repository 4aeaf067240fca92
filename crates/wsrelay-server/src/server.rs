//! `RelayServer`: axum HTTP front end for the relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use wsrelay_core::{ConnectionRegistry, LifecycleController};
use wsrelay_settings::{RelaySettings, ServerSettings};

use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::socket::AxumChannel;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Entry point for upgraded sockets.
    pub controller: LifecycleController,
    /// When the server started.
    pub start_time: Instant,
    /// Largest accepted message.
    pub max_message_size: usize,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay's HTTP server.
pub struct RelayServer {
    settings: ServerSettings,
    controller: LifecycleController,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server with a fresh registry.
    pub fn new(settings: &RelaySettings) -> Self {
        Self {
            settings: settings.server.clone(),
            controller: LifecycleController::new(settings.relay.clone()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            controller: self.controller.clone(),
            start_time: self.start_time,
            max_message_size: self.settings.max_message_size,
            metrics: self.metrics.clone(),
        };

        let router = Router::new()
            .route(&self.settings.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let router = match &self.settings.static_dir {
            Some(dir) => router.fallback_service(ServeDir::new(dir)),
            None => router,
        };
        router.layer(TraceLayer::new_for_http())
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.controller.registry()
    }

    /// The lifecycle controller upgraded sockets are handed to.
    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Bind and start serving in the background.
    pub async fn listen(self) -> Result<ServerHandle, ServerError> {
        let addr = self.settings.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%local_addr, path = %self.settings.path, "relay server listening");
        Ok(ServerHandle {
            local_addr,
            path: self.settings.path.clone(),
            shutdown_timeout: self.settings.shutdown_timeout(),
            registry: Arc::clone(self.controller.registry()),
            shutdown: self.shutdown,
            task,
        })
    }
}

/// A running server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    path: String,
    shutdown_timeout: Duration,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL of the relay endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.path)
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stop accepting, wait for the listener to finish and clear the registry.
    pub async fn shutdown(self) {
        let _ = self.shutdown.drain(self.task, self.shutdown_timeout).await;
        let cleared = self.registry.clear();
        info!(cleared, "relay server stopped");
    }
}

/// GET {path}: WebSocket upgrade into the relay.
async fn ws_handler(
    State(state): State<AppState>,
    extensions: Extensions,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(error = %rejection, "rejected non-upgrade request");
            return (StatusCode::BAD_REQUEST, "expected a WebSocket upgrade request").into_response();
        }
    };

    let remote_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let controller = state.controller;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            match controller
                .handle_connection(AxumChannel::new(socket), remote_addr)
                .await
            {
                Err(e) if e.is_fatal() => error!(error = %e, ?remote_addr, "connection rejected"),
                Err(e) => warn!(error = %e, ?remote_addr, "connection ended with error"),
                Ok(_) => {}
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.controller.registry().len();
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
