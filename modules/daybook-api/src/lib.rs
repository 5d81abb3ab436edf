pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;
use tower_http::set_header::SetResponseHeaderLayer;
use uuid::Uuid;

use daybook_curator::CuratorAgent;
use daybook_pipeline::{Analyzer, BulkHandle, BulkOrchestrator};
use daybook_store::SessionStore;

pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    pub orchestrator: BulkOrchestrator,
    /// Batch runs by id. Kept after they finish so status stays readable.
    pub batches: Mutex<HashMap<Uuid, Arc<BulkHandle>>>,
    pub curator: Arc<CuratorAgent>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AppState {
    pub fn new(analyzer: Arc<Analyzer>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            orchestrator: BulkOrchestrator::new(analyzer.clone()),
            curator: Arc::new(CuratorAgent::new(analyzer.clone(), sessions.clone())),
            batches: Mutex::new(HashMap::new()),
            analyzer,
            sessions,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(rest::api_health))
        .route("/api/analysis/{date}", post(rest::api_analyze))
        .route("/api/analysis/{date}/selection", post(rest::api_confirm_selection))
        .route("/api/batch", post(rest::batch::api_batch_start))
        .route("/api/batch/{run_id}", get(rest::batch::api_batch_status))
        .route("/api/batch/{run_id}/selection", post(rest::batch::api_batch_selection))
        .route("/api/batch/{run_id}/cancel", post(rest::batch::api_batch_cancel))
        .route("/api/curator/runs", post(rest::curator::api_curator_start))
        .route("/api/curator/runs/{id}", get(rest::curator::api_curator_status))
        .route("/api/curator/runs/{id}/resume", post(rest::curator::api_curator_resume))
        .route("/api/curator/runs/{id}/cancel", post(rest::curator::api_curator_cancel))
        .with_state(state)
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Logging layer: method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
