//! Local HTTP surface of the bridge.
//!
//! Exposes the lock registry and the two host commands:
//!
//! ```text
//! GET  /health
//! GET  /locks                    latest state of every lock
//! GET  /locks/:id                latest state of one lock
//! GET  /events?lock_id=&limit=   recent access events, newest first
//! GET  /stats                    bridge statistics
//! POST /locks/:id/unlatch
//! POST /locks/:id/lock-n-go?unlatch=true
//! ```

use crate::api::error::ApiError;
use crate::api::types::LockState;
use crate::api::LockApi;
use crate::commands;
use crate::core::event::AccessEvent;
use crate::registry::SharedRegistry;
use crate::stats::{BridgeStatsSnapshot, SharedBridgeStats};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Events returned by `/events` when no limit is given.
const DEFAULT_EVENT_LIMIT: usize = 50;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state
pub struct ServerState<A> {
    api: Arc<A>,
    registry: SharedRegistry,
    stats: SharedBridgeStats,
}

impl<A: LockApi> ServerState<A> {
    pub fn new(api: Arc<A>, registry: SharedRegistry, stats: SharedBridgeStats) -> Self {
        Self {
            api,
            registry,
            stats,
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub locks: usize,
}

/// Response of a command endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub status: String,
    pub smartlock_id: u64,
    pub action: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub lock_id: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LockNGoQuery {
    #[serde(default)]
    pub unlatch: bool,
}

fn error_response(error: ApiError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &error {
        ApiError::Api { status: 404, .. } => (StatusCode::NOT_FOUND, "LOCK_NOT_FOUND"),
        ApiError::Authentication(_) => (StatusCode::BAD_GATEWAY, "AUTHENTICATION_ERROR"),
        ApiError::Connectivity(_) => (StatusCode::GATEWAY_TIMEOUT, "CONNECTIVITY_ERROR"),
        _ => (StatusCode::BAD_GATEWAY, "API_ERROR"),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health<A: LockApi>(State(state): State<Arc<ServerState<A>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        locks: state.registry.states().await.len(),
    })
}

/// GET /locks
async fn list_locks<A: LockApi>(State(state): State<Arc<ServerState<A>>>) -> Json<Vec<LockState>> {
    Json(state.registry.states().await)
}

/// GET /locks/:id
async fn get_lock<A: LockApi>(
    State(state): State<Arc<ServerState<A>>>,
    Path(lock_id): Path<u64>,
) -> ApiResult<LockState> {
    state.registry.state(lock_id).await.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Lock {lock_id} is not polled by this bridge"),
                code: "LOCK_NOT_FOUND".to_string(),
            }),
        )
    })
}

/// GET /events
async fn list_events<A: LockApi>(
    State(state): State<Arc<ServerState<A>>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<AccessEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.registry.recent_events(query.lock_id, limit).await)
}

/// GET /stats
async fn stats<A: LockApi>(State(state): State<Arc<ServerState<A>>>) -> Json<BridgeStatsSnapshot> {
    Json(state.stats.snapshot())
}

/// POST /locks/:id/unlatch
async fn unlatch<A: LockApi>(
    State(state): State<Arc<ServerState<A>>>,
    Path(lock_id): Path<u64>,
) -> ApiResult<CommandResponse> {
    commands::unlatch(&*state.api, lock_id)
        .await
        .map_err(error_response)?;
    Ok(Json(CommandResponse {
        status: "ok".to_string(),
        smartlock_id: lock_id,
        action: "unlatch".to_string(),
    }))
}

/// POST /locks/:id/lock-n-go
async fn lock_n_go<A: LockApi>(
    State(state): State<Arc<ServerState<A>>>,
    Path(lock_id): Path<u64>,
    Query(query): Query<LockNGoQuery>,
) -> ApiResult<CommandResponse> {
    commands::lock_n_go(&*state.api, lock_id, query.unlatch)
        .await
        .map_err(error_response)?;
    let action = if query.unlatch {
        "lock_n_go_unlatch"
    } else {
        "lock_n_go"
    };
    Ok(Json(CommandResponse {
        status: "ok".to_string(),
        smartlock_id: lock_id,
        action: action.to_string(),
    }))
}

/// Build the router for a server state.
pub fn router<A: LockApi + 'static>(state: Arc<ServerState<A>>) -> Router {
    Router::new()
        .route("/health", get(health::<A>))
        .route("/locks", get(list_locks::<A>))
        .route("/locks/:id", get(get_lock::<A>))
        .route("/locks/:id/unlatch", post(unlatch::<A>))
        .route("/locks/:id/lock-n-go", post(lock_n_go::<A>))
        .route("/events", get(list_events::<A>))
        .route("/stats", get(stats::<A>))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run<A: LockApi + 'static>(
    config: ServerConfig,
    state: Arc<ServerState<A>>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Bridge server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
