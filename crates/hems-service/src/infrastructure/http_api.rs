//! HTTP polling and command API (axum).
//!
//! | Method | Path                                  | Purpose                          |
//! |--------|---------------------------------------|----------------------------------|
//! | GET    | `/api/status`                         | counters and uptime              |
//! | GET    | `/api/peers`                          | all peers                        |
//! | GET    | `/api/peers/{ski}`                    | one peer                         |
//! | DELETE | `/api/peers/{ski}`                    | forget a peer                    |
//! | GET    | `/api/peers/{ski}/values`             | capability values of a peer      |
//! | GET    | `/api/peers/{ski}/entities`           | cached topology of a peer        |
//! | PUT    | `/api/peers/{ski}/usecases/{name}`    | set one peer's support flag      |
//! | GET    | `/api/logs`                           | retained log (`?ski=` filter)    |
//! | GET    | `/api/usecases`                       | global enablement table          |
//! | POST   | `/api/usecases`                       | change global enablement         |
//! | POST   | `/api/write`                          | write a capability value         |
//!
//! Readers go straight to the registry and the log buffer; every mutation
//! goes through the [`Broadcaster`] so observers see it.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hems_core::{EntityInfo, PeerId, PeerSummary, UsecaseState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::application::{lock_record, Broadcaster, CommandError, CommandService, WriteReport};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub broadcaster: Arc<Broadcaster>,
    pub commands: CommandService,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(broadcaster: Arc<Broadcaster>, commands: CommandService) -> Self {
        Self {
            broadcaster,
            commands,
            started_at: Utc::now(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::UnknownPeer(_) | ApiError::Command(CommandError::UnknownPeer(_)) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Command(CommandError::Partial { failures, written }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": message,
                    "failures": failures,
                    "written": written,
                })),
            )
                .into_response(),
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Builds the API router.
pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/status", get(handle_status))
        .route("/peers", get(handle_peers))
        .route("/peers/{ski}", get(handle_peer).delete(handle_peer_remove))
        .route("/peers/{ski}/values", get(handle_peer_values))
        .route("/peers/{ski}/entities", get(handle_peer_entities))
        .route("/peers/{ski}/usecases/{name}", put(handle_peer_usecase))
        .route("/logs", get(handle_logs))
        .route("/usecases", get(handle_usecases).post(handle_usecase_toggle))
        .route("/write", post(handle_write))
        .with_state(state);

    Router::new().nest("/api", api)
}

/// Binds `addr` and serves the API until `running` is cleared.
pub async fn run_server(
    addr: SocketAddr,
    state: ApiState,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP API on {addr}"))?;
    info!("HTTP API listening on http://{addr}/api");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(wait_for_shutdown(running))
        .await
        .context("HTTP API server failed")
}

async fn wait_for_shutdown(running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!("shutdown flag set; stopping HTTP API");
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub peers: usize,
    pub connected: usize,
    pub observers: usize,
    pub log_lines: usize,
    pub log_capacity: usize,
    pub uptime_secs: i64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let b = &state.broadcaster;
    let peers = b.registry().all();
    Json(StatusResponse {
        peers: peers.len(),
        connected: peers.iter().filter(|p| p.connected()).count(),
        observers: b.subscriber_count(),
        log_lines: b.logs().len(),
        log_capacity: b.logs().capacity(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

// ── /peers ────────────────────────────────────────────────────────────────────

pub async fn handle_peers(State(state): State<ApiState>) -> Json<Vec<PeerSummary>> {
    let peers = state.broadcaster.registry().all();
    Json(peers.iter().map(PeerSummary::from).collect())
}

pub async fn handle_peer(
    State(state): State<ApiState>,
    Path(ski): Path<String>,
) -> Result<Json<PeerSummary>, ApiError> {
    let ski = PeerId::new(ski);
    let handle = state
        .broadcaster
        .registry()
        .get(&ski)
        .ok_or(ApiError::UnknownPeer(ski))?;
    let summary = PeerSummary::from(&*lock_record(&handle));
    Ok(Json(summary))
}

pub async fn handle_peer_remove(
    State(state): State<ApiState>,
    Path(ski): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ski = PeerId::new(ski);
    match state.broadcaster.remove_peer(&ski) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::UnknownPeer(ski)),
    }
}

pub async fn handle_peer_values(
    State(state): State<ApiState>,
    Path(ski): Path<String>,
) -> Result<Json<Map<String, Value>>, ApiError> {
    let ski = PeerId::new(ski);
    let handle = state
        .broadcaster
        .registry()
        .get(&ski)
        .ok_or(ApiError::UnknownPeer(ski))?;
    let values = lock_record(&handle).values().clone();
    Ok(Json(values))
}

/// Cached topology; an empty list when none has been rendered yet.
pub async fn handle_peer_entities(
    State(state): State<ApiState>,
    Path(ski): Path<String>,
) -> Result<Json<Vec<EntityInfo>>, ApiError> {
    let ski = PeerId::new(ski);
    let handle = state
        .broadcaster
        .registry()
        .get(&ski)
        .ok_or(ApiError::UnknownPeer(ski))?;
    let entities = lock_record(&handle)
        .topology()
        .map(|t| t.entities.clone())
        .unwrap_or_default();
    Ok(Json(entities))
}

#[derive(Debug, Deserialize)]
pub struct SupportRequest {
    pub supported: bool,
}

pub async fn handle_peer_usecase(
    State(state): State<ApiState>,
    Path((ski, name)): Path<(String, String)>,
    Json(req): Json<SupportRequest>,
) -> Result<Json<UsecaseState>, ApiError> {
    let ski = PeerId::new(ski);
    state
        .broadcaster
        .set_supported(&ski, &name, req.supported)
        .ok_or(ApiError::UnknownPeer(ski))?;
    Ok(Json(UsecaseState {
        name,
        supported: req.supported,
    }))
}

// ── /logs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub ski: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

pub async fn handle_logs(
    State(state): State<ApiState>,
    Query(query): Query<LogQuery>,
) -> Json<LogsResponse> {
    let entries = state.broadcaster.logs().snapshot();
    let logs = entries
        .into_iter()
        .filter(|e| match &query.ski {
            Some(ski) => e.ski.as_ref().map(PeerId::as_str) == Some(ski.as_str()),
            None => true,
        })
        .map(|e| e.line)
        .collect();
    Json(LogsResponse { logs })
}

// ── /usecases ─────────────────────────────────────────────────────────────────

pub async fn handle_usecases(State(state): State<ApiState>) -> Json<Vec<UsecaseState>> {
    let globals = state.broadcaster.registry().globals();
    Json(
        globals
            .into_iter()
            .map(|(name, supported)| UsecaseState { name, supported })
            .collect(),
    )
}

pub async fn handle_usecase_toggle(
    State(state): State<ApiState>,
    Json(req): Json<UsecaseState>,
) -> Json<UsecaseState> {
    state
        .broadcaster
        .set_global_enablement(&req.name, req.supported);
    Json(req)
}

// ── /write ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub capability: String,
    #[serde(default)]
    pub ski: Option<String>,
    #[serde(default)]
    pub value: Value,
}

pub async fn handle_write(
    State(state): State<ApiState>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteReport>, ApiError> {
    let ski = req.ski.map(PeerId::new);
    let report = state
        .commands
        .write_capability_value(&req.capability, ski.as_ref(), &req.value)
        .await?;
    Ok(Json(report))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
