//! `GomerServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use gomer_core::ConnectionId;
use gomer_sandbox::SandboxError;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::coordinator::SessionCoordinator;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionLimits, run_ws_session};

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The sandbox could not produce viewer output.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    /// The viewer limit is reached.
    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),
    /// Shutdown has begun; no new viewers are accepted.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Sandbox(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConnectionLimit(_) | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Document, registry, broadcast and sandbox.
    pub coordinator: Arc<SessionCoordinator>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The gomer server.
pub struct GomerServer {
    config: Arc<ServerConfig>,
    coordinator: Arc<SessionCoordinator>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl GomerServer {
    /// Create a server around `coordinator`.
    pub fn new(config: ServerConfig, coordinator: Arc<SessionCoordinator>) -> Self {
        Self {
            config: Arc::new(config),
            coordinator,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    fn state(&self) -> AppState {
        AppState {
            coordinator: self.coordinator.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        }
    }

    /// Build the Axum router with all routes and layers.
    pub fn router(&self) -> Router {
        let state = self.state();

        let mut router = Router::new()
            .route("/conn", get(ws_handler))
            .route("/run", post(run_handler))
            .route("/format", post(format_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .with_state(state);

        if let Some(dir) = &self.config.static_dir {
            router = router.fallback_service(ServeDir::new(dir));
        }
        router = router.layer(TraceLayer::new_for_http());
        if self.config.cors {
            router = router.layer(CorsLayer::permissive());
        }
        router
    }

    /// Bind and serve in the background until shutdown.
    ///
    /// The serve task is tracked by the [`ShutdownCoordinator`]. Returns the
    /// bound address.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
        });
        self.shutdown.track(handle);

        info!(%addr, "gomer server listening");
        Ok(addr)
    }

    /// The session coordinator.
    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /conn
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if let Err(e) = admit_viewer(&state) {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        warn!(error = %e, "rejecting viewer");
        return e.into_response();
    }

    let limits = SessionLimits {
        queue_capacity: state.config.send_queue_capacity,
        send_timeout: state.config.send_timeout,
        ping_interval: state.config.ping_interval,
        pong_timeout: state.config.pong_timeout,
    };
    let coordinator = state.coordinator.clone();
    let token = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, ConnectionId::new(), coordinator, limits, token))
}

/// Refuse new viewers once shutdown has begun or the limit is reached.
fn admit_viewer(state: &AppState) -> Result<(), ApiError> {
    if state.shutdown.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }
    let max = state.config.max_connections;
    if state.coordinator.registry().len() >= max {
        return Err(ApiError::ConnectionLimit(max));
    }
    Ok(())
}

/// POST /run
///
/// The body is used byte for byte; invalid UTF-8 is left for the compiler
/// to report.
async fn run_handler(State(state): State<AppState>, source: Bytes) -> Result<StatusCode, ApiError> {
    let _ = state.coordinator.run(&source).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /format
async fn format_handler(State(state): State<AppState>, source: Bytes) -> Result<StatusCode, ApiError> {
    let _ = state.coordinator.format(&source).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.coordinator.registry().len(),
        &state.coordinator.document().snapshot(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
