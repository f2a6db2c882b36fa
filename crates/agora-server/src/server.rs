//! Router, HTTP handlers and server startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_core::{ParticipantId, ReplyGenerator, Session, SessionId, SessionStore};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::health::{HealthResponse, health_check};
use crate::hub::{CreateSessionRequest, DebateHub};
use crate::websocket::broadcast::BroadcastManager;
use crate::websocket::session::run_ws_session;

/// Default wait for in-flight connections during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Debate orchestration.
    pub hub: Arc<DebateHub>,
    /// Server start, for uptime.
    pub start_time: Instant,
    /// Fires on shutdown; socket tasks watch it.
    pub shutdown: CancellationToken,
}

/// Query string of the `/ws` upgrade.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    /// Session to join.
    pub session_id: SessionId,
    /// Opaque participant token; a fresh id is issued when absent.
    #[serde(default)]
    pub token: Option<String>,
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/{id}", get(get_session_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, spawn the server and return a handle to stop it.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn SessionStore>,
    replies: Arc<dyn ReplyGenerator>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let broadcast = Arc::new(BroadcastManager::new());
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;

    let hub = DebateHub::new(store, replies, Arc::clone(&broadcast), config, shutdown.clone());
    let router = build_router(AppState {
        hub,
        start_time: Instant::now(),
        shutdown: shutdown.clone(),
    });

    info!(%addr, "agora server started");

    let signal = shutdown.clone();
    let task = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(error) = served {
            warn!(%error, "server exited with error");
        }
    });

    Ok(ServerHandle { addr, shutdown, broadcast, task })
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    broadcast: Arc<BroadcastManager>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connected WebSocket clients.
    pub fn connection_count(&self) -> usize {
        self.broadcast.connection_count()
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolve once the server task exits.
    pub async fn wait(self) {
        let _ = self.task.await;
    }

    /// Stop accepting, close every socket and wait for the server task.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(SHUTDOWN_TIMEOUT);
        self.shutdown.cancel();
        let abort = self.task.abort_handle();
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            warn!(?timeout, "shutdown timed out, aborting server task");
            abort.abort();
        }
        info!("agora server stopped");
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(state.start_time, state.hub.is_draining(), state.hub.stats()))
}

async fn create_session_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = state.hub.create_session(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<SessionId>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.hub.load_session(&id).await?))
}

/// Upgrade after checking the session exists; unknown sessions get 404.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, ApiError> {
    let session = state.hub.load_session(&params.session_id).await?;
    let participant_id = params
        .token
        .filter(|t| !t.trim().is_empty())
        .map_or_else(ParticipantId::new, ParticipantId::from);
    let client_id = format!("client_{}", Uuid::now_v7());
    let max_message_size = state.hub.config().max_message_size;

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket: WebSocket| {
            run_ws_session(socket, state.hub, session, participant_id, client_id, state.shutdown)
        })
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_params_parse_camel_case() {
        let params: WsParams =
            serde_json::from_value(serde_json::json!({"sessionId": "s1", "token": "u1"})).unwrap();
        assert_eq!(params.session_id.as_str(), "s1");
        assert_eq!(params.token.as_deref(), Some("u1"));
    }

    #[test]
    fn token_is_optional() {
        let params: WsParams =
            serde_json::from_value(serde_json::json!({"sessionId": "s1"})).unwrap();
        assert!(params.token.is_none());
    }
}
