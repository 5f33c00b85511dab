//! `GameHubServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::Utc;
use gamehub_core::{GlobalStats, StatsAggregator};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};
use crate::websocket::broadcast::BroadcastEngine;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Event counters.
    pub stats: Arc<StatsAggregator>,
    /// Inbound event fan-out.
    pub engine: Arc<BroadcastEngine>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The gamehub server.
pub struct GameHubServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<StatsAggregator>,
    engine: Arc<BroadcastEngine>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
}

impl GameHubServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(StatsAggregator::new());
        let engine = Arc::new(BroadcastEngine::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.max_total_drops,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new(config.shutdown_timeout()));
        Self {
            config: Arc::new(config),
            registry,
            stats,
            engine,
            shutdown,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub(crate) fn state(&self) -> AppState {
        AppState {
            registry: Arc::clone(&self.registry),
            stats: Arc::clone(&self.stats),
            engine: Arc::clone(&self.engine),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            metrics: self.metrics.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/stats", get(stats_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state())
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    /// The task ends after [`ShutdownCoordinator::shutdown`]; pass it to
    /// [`graceful_shutdown`](Self::graceful_shutdown) to also drain sessions.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let signal = async move { token.cancelled().await };
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(signal)
            .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("listener stopped");
        });

        info!(%local_addr, "gamehub listening");
        Ok((local_addr, handle))
    }

    /// Stop accepting, close every live connection, and wait for sessions
    /// to finish within the configured window.
    pub async fn graceful_shutdown(&self, serve_task: JoinHandle<()>) -> DrainOutcome {
        self.shutdown.drain(serve_task, &self.registry).await
    }

    /// Live connections.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Event counters.
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let clients = state.registry.connection_count();
    Json(health::health_check(state.stats.export(), clients, Utc::now()))
}

/// GET /stats
async fn stats_handler(State(state): State<AppState>) -> Json<GlobalStats> {
    Json(state.stats.export())
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| warn!(%remote_addr, error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| run_ws_session(socket, Some(remote_addr), state))
}
