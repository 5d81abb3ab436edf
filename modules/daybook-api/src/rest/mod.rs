pub mod batch;
pub mod curator;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use daybook_common::CancelFlag;
use daybook_pipeline::{AnalysisError, AnalysisOutcome, SkipReason};

use crate::AppState;

// --- Request bodies ---

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct AnalyzeRequest {
    force_reanalysis: bool,
}

#[derive(Deserialize)]
pub struct ConfirmSelectionRequest {
    article_id: String,
}

// --- Helpers ---

pub(crate) fn error_json(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

fn analysis_error(date: NaiveDate, e: AnalysisError) -> Response {
    match e {
        AnalysisError::UnknownArticle(_) => error_json(StatusCode::BAD_REQUEST, e),
        AnalysisError::NoPendingSelection(_) => error_json(StatusCode::NOT_FOUND, e),
        AnalysisError::ManualOverride(_) | AnalysisError::DateLocked(_) => {
            error_json(StatusCode::CONFLICT, e)
        }
        AnalysisError::Provider(_) | AnalysisError::Store(_) => {
            warn!(%date, error = %e, "Analysis failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Handlers ---

pub async fn api_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Analyze one date. Answers with the record, or with the candidates when a
/// human has to pick the article.
pub async fn api_analyze(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
    Json(body): Json<AnalyzeRequest>,
) -> impl IntoResponse {
    let cancel = CancelFlag::new();
    match state
        .analyzer
        .analyze_one(date, body.force_reanalysis, &cancel)
        .await
    {
        Ok(AnalysisOutcome::Completed(record)) => Json(record).into_response(),
        Ok(AnalysisOutcome::RequiresSelection(request)) => {
            let mut payload = serde_json::json!(request);
            payload["requires_selection"] = true.into();
            Json(payload).into_response()
        }
        Ok(AnalysisOutcome::Skipped(SkipReason::Locked)) => error_json(
            StatusCode::CONFLICT,
            format!("Date {date} is being analyzed by another run"),
        ),
        Ok(AnalysisOutcome::Cancelled) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Err(e) => analysis_error(date, e),
    }
}

pub async fn api_confirm_selection(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
    Json(body): Json<ConfirmSelectionRequest>,
) -> impl IntoResponse {
    match state.analyzer.confirm_selection(date, &body.article_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => analysis_error(date, e),
    }
}
