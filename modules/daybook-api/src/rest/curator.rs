use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::{info, warn};
use uuid::Uuid;

use daybook_common::AgentConfig;
use daybook_curator::CuratorError;

use super::error_json;
use crate::AppState;

fn accepted(session_id: Uuid) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "session_id": session_id })),
    )
        .into_response()
}

fn start_error(session: Option<Uuid>, e: anyhow::Error) -> Response {
    match e.downcast_ref::<CuratorError>() {
        Some(CuratorError::AlreadyRunning) => error_json(StatusCode::CONFLICT, CuratorError::AlreadyRunning),
        Some(CuratorError::UnknownSession(_)) => StatusCode::NOT_FOUND.into_response(),
        None => {
            warn!(?session, error = %e, "Failed to start curator run");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Prepare a session and run it in the background.
pub async fn api_curator_start(
    State(state): State<Arc<AppState>>,
    Json(config): Json<AgentConfig>,
) -> impl IntoResponse {
    if let Err(e) = config.validate() {
        return error_json(StatusCode::BAD_REQUEST, e);
    }
    match state.curator.start(config).await {
        Ok(session) => {
            info!(session = %session.id, "Curator run started");
            accepted(session.id)
        }
        Err(e) => start_error(None, e),
    }
}

/// Live status while the session runs, its checkpoint afterwards.
pub async fn api_curator_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let status = state.curator.status();
    if status.session_id == Some(id) {
        return Json(status).into_response();
    }
    match state.sessions.load_session(id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(session = %id, error = %e, "Failed to load curator session");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_curator_resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.curator.start_resume(id).await {
        Ok(session) => {
            info!(session = %id, phase = %session.phase, "Curator resume accepted");
            accepted(id)
        }
        Err(e) => start_error(Some(id), e),
    }
}

pub async fn api_curator_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let status = state.curator.status();
    if !status.running || status.session_id != Some(id) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.curator.cancel();
    info!(session = %id, "Curator cancel requested");
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "cancelling" })),
    )
        .into_response()
}
