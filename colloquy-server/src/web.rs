//! HTTP surface: observer WebSocket and read-only REST API.

use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use colloquy_agents::archive::ArchivedConversation;
use colloquy_agents::roster::AgentProfile;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::server::SharedState;

/// Build the axum router with WebSocket and REST endpoints.
pub fn router(state: Arc<SharedState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        // Observer transport
        .route("/ws", get(ws_upgrade))
        // REST API (read-only, v1)
        .route("/api/v1/health", get(api_health))
        .route("/api/v1/agents", get(api_agents))
        .route("/api/v1/conversations", get(api_conversations))
        .route("/api/v1/conversations/{id}", get(api_conversation))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    use axum::http::{HeaderValue, Method, header};
    use tower_http::cors::AllowOrigin;

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// ── WebSocket handler ──────────────────────────────────────────────────

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<SharedState>) {
    if let Err(e) = crate::connection::handle(socket, state).await {
        tracing::error!("WebSocket connection error: {e}");
    }
}

// ── REST types ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_sessions: usize,
    pub uptime_secs: u64,
}

#[derive(Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub display_name: String,
}

impl From<&AgentProfile> for AgentInfo {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            name: profile.name.clone(),
            display_name: profile.display_name.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// ── REST handlers ──────────────────────────────────────────────────────

async fn api_health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.registry.active_sessions(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

async fn api_agents(State(state): State<Arc<SharedState>>) -> Json<Vec<AgentInfo>> {
    Json(state.registry.roster().profiles().iter().map(AgentInfo::from).collect())
}

async fn api_conversations(
    Query(params): Query<ListQuery>,
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Vec<ArchivedConversation>>, StatusCode> {
    let archive = state.archive.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    archive.list(limit).map(Json).map_err(|e| {
        tracing::error!("Archive list failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn api_conversation(
    Path(id): Path<String>,
    State(state): State<Arc<SharedState>>,
) -> Result<Json<ArchivedConversation>, StatusCode> {
    let archive = state.archive.as_ref().ok_or(StatusCode::NOT_FOUND)?;
    match archive.get(&id) {
        Ok(Some(conversation)) => Ok(Json(conversation)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(session = %id, "Archive lookup failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
