use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dashmap::DashMap;
use serde::Deserialize;
use shiftwatch_core::{AccountId, ConnectionId};
use shiftwatch_store::{Database, DistractionRepo, IncidentRepo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::connection::{ChannelRole, ClientConnection};
use crate::gateway::Gateway;
use crate::monitor::PresenceMonitor;
use crate::prober;
use crate::websocket;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<PresenceMonitor>,
    pub gateway: Arc<Gateway>,
    pub connections: Arc<DashMap<ConnectionId, Arc<ClientConnection>>>,
    pub shutdown: CancellationToken,
    pub max_send_queue: usize,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &ServerConfig, db: Database, shutdown: CancellationToken) -> Self {
        let monitor = Arc::new(PresenceMonitor::new(
            config.liveness.clone(),
            Arc::new(IncidentRepo::new(db.clone())),
        ));
        let gateway = Arc::new(Gateway::new(Arc::clone(&monitor), DistractionRepo::new(db)));
        Self {
            monitor,
            gateway,
            connections: Arc::new(DashMap::new()),
            shutdown,
            max_send_queue: config.max_send_queue.max(1),
            started_at: Instant::now(),
        }
    }
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub role: ChannelRole,
    pub account_id: Option<AccountId>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener, spawn the prober and start serving.
///
/// Everything stops when `shutdown` is cancelled.
pub async fn start(
    config: ServerConfig,
    db: Database,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(&config, db, shutdown.clone());
    let monitor = Arc::clone(&state.monitor);

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(
        addr = %local_addr,
        tick_ms = config.liveness.tick_interval.as_millis() as u64,
        timeout_ms = config.liveness.probe_timeout.as_millis() as u64,
        max_missed = config.liveness.max_missed_probes,
        "shiftwatch server started"
    );

    let prober = prober::spawn_prober(monitor, shutdown.clone());

    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        tasks: vec![server, prober],
    })
}

/// Handle returned by `start()`: bound port and background tasks.
pub struct ServerHandle {
    pub port: u16,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: AppState, params: ConnectParams) {
    let (tx, rx) = mpsc::channel(state.max_send_queue);
    let conn = Arc::new(ClientConnection::new(params.role, tx));
    let _ = state.connections.insert(conn.id.clone(), Arc::clone(&conn));
    info!(conn_id = %conn.id, role = %conn.role, "client connected");

    if let Some(account) = &params.account_id {
        let _ = state.monitor.bind(account, &conn);
    }

    let cause = websocket::serve_connection(
        socket,
        Arc::clone(&conn),
        rx,
        Arc::clone(&state.gateway),
        state.shutdown.clone(),
    )
    .await;

    let _ = state.monitor.channel_closed(&conn, cause);
    let _ = state.connections.remove(&conn.id);
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.monitor.stats();
    let status = if state.shutdown.is_cancelled() { "shutting_down" } else { "healthy" };
    Json(serde_json::json!({
        "status": status,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "connections": state.connections.len(),
        "accounts": stats.accounts,
        "checked_in": stats.checked_in,
    }))
}
