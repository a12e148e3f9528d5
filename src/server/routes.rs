//! HTTP request surface.
//!
//! Deliberately thin: session creation returns only the session id (loading
//! state flows exclusively over the replay channel), the listing exposes
//! lifecycle states, and `/replay/{session_id}` upgrades to the streaming
//! control plane.

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::session::{SessionKey, SessionRegistry, SessionSummary, SessionType};
use crate::stream::{ReplayChannel, serve_attachment};

use super::ws::WsChannel;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub shutdown: CancellationToken,
}

/// Create/attach request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub year: u16,
    pub round: u8,
    pub session_type: SessionType,
}

/// Create/attach response: the session id and nothing else. Loading status
/// deliberately stays off this surface.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/sessions", post(create_session).get(list_sessions))
        .route("/replay/{session_id}", get(replay_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Json<CreateSessionResponse> {
    let key = SessionKey::new(request.year, request.round, request.session_type);
    info!(session = %key, "Create/attach request");

    let record = state.registry.create(key);
    Json(CreateSessionResponse {
        session_id: record.key().session_id(),
    })
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.registry.summaries(),
    })
}

async fn replay_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        let mut channel = WsChannel::new(socket);

        match SessionKey::parse_id(&session_id) {
            Ok(key) => {
                serve_attachment(
                    state.registry.clone(),
                    key,
                    channel,
                    state.shutdown.child_token(),
                )
                .await;
            }
            Err(err) => {
                // Same close semantics as an unknown session.
                warn!(session_id, error = %err, "Unparseable session id on attach");
                let _ = channel
                    .send_text(crate::stream::messages::session_not_found())
                    .await;
                channel.close().await;
            }
        }
    })
}
