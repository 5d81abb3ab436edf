use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use chrono::{NaiveDate, Utc};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use uuid::Uuid;

use daybook_pipeline::{BulkEvent, BulkHandle, SelectionDecision};

use super::error_json;
use crate::AppState;

/// Finished runs are forgotten after this long.
const FINISHED_RETENTION_HOURS: i64 = 24;

#[derive(Deserialize)]
pub struct BatchRequest {
    dates: Vec<NaiveDate>,
}

#[derive(Deserialize)]
pub struct BatchSelectionRequest {
    /// The date being answered; must match the pending prompt.
    date: NaiveDate,
    article_id: Option<String>,
    #[serde(default)]
    skip: bool,
}

fn event_name(event: &BulkEvent) -> &'static str {
    match event {
        BulkEvent::Started { .. } => "started",
        BulkEvent::Progress { .. } => "progress",
        BulkEvent::SelectionRequired { .. } => "selection_required",
        BulkEvent::DateFailed { .. } => "date_failed",
        BulkEvent::Finished { .. } => "finished",
    }
}

fn to_sse(run_id: Uuid, event: &BulkEvent) -> Event {
    let mut payload = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(e) => {
            warn!(%run_id, error = %e, "Failed to serialize batch event");
            serde_json::json!({ "type": event_name(event) })
        }
    };
    payload["run_id"] = serde_json::json!(run_id);
    Event::default().event(event_name(event)).data(payload.to_string())
}

/// Relay run events until the run finishes or the client goes away.
fn event_stream(
    run_id: Uuid,
    mut events: UnboundedReceiver<BulkEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(event) = events.recv().await {
            let done = matches!(event, BulkEvent::Finished { .. });
            yield Ok(to_sse(run_id, &event));
            if done {
                break;
            }
        }
    }
}

async fn find(state: &AppState, run_id: Uuid) -> Option<Arc<BulkHandle>> {
    state.batches.lock().await.get(&run_id).cloned()
}

/// Start a batch and stream its progress as server-sent events.
pub async fn api_batch_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchRequest>,
) -> Response {
    if body.dates.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "dates must not be empty");
    }

    let (handle, events) = state.orchestrator.start(body.dates);
    let run_id = handle.run_id;
    {
        let mut batches = state.batches.lock().await;
        let cutoff = Utc::now() - chrono::Duration::hours(FINISHED_RETENTION_HOURS);
        batches.retain(|_, h| {
            let snapshot = h.snapshot();
            !snapshot.status.is_terminal() || snapshot.started_at > cutoff
        });
        batches.insert(run_id, Arc::new(handle));
    }
    info!(%run_id, "Batch started");

    Sse::new(event_stream(run_id, events))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("heartbeat"),
        )
        .into_response()
}

pub async fn api_batch_status(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    match find(&state, run_id).await {
        Some(handle) => Json(handle.snapshot()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Answer a run that is waiting on an article choice.
pub async fn api_batch_selection(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
    Json(body): Json<BatchSelectionRequest>,
) -> impl IntoResponse {
    let Some(handle) = find(&state, run_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let decision = match (body.skip, body.article_id) {
        (true, _) => SelectionDecision::Skip,
        (false, Some(id)) if !id.trim().is_empty() => SelectionDecision::Choose(id),
        _ => return error_json(StatusCode::BAD_REQUEST, "Provide article_id or skip: true"),
    };
    match handle.snapshot().pending_selection {
        Some(pending) if pending.date == body.date => {}
        Some(pending) => {
            return error_json(
                StatusCode::CONFLICT,
                format!("Selection pending for {}, not {}", pending.date, body.date),
            )
        }
        None => return error_json(StatusCode::CONFLICT, "No selection is pending for this run"),
    }
    if !handle.decide(body.date, decision) {
        return error_json(StatusCode::CONFLICT, "Run has already finished");
    }
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response()
}

pub async fn api_batch_cancel(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<Uuid>,
) -> impl IntoResponse {
    match find(&state, run_id).await {
        Some(handle) => {
            handle.cancel();
            info!(%run_id, "Batch cancel requested");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "status": "cancelling" })),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
