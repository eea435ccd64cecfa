//! HTTP API
//!
//! Routes:
//! - `POST /api/test/start`              run the workflow, reply `{testId, status}`
//! - `GET  /api/test/result/:testId`     full record of one run
//! - `GET  /api/test/results?limit=N`    newest run summaries
//! - `GET  /health`

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use vidprobe_common::{
    format_timestamp, Database, Diagnosis, RunAck, RunRecord, RunStatus, RunSummary, StepResult,
};
use vidprobe_runner::{Diagnoser, FsEvidenceSink, LlmClient, Orchestrator, PlaywrightLauncher};

use crate::config::AppConfig;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Shared handler context, built once at startup
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub store: Database,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let store = orchestrator.store().clone();
        Self { orchestrator, store }
    }

    /// Open the store and build the production browser, evidence and
    /// reasoning capabilities.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Arc<Self>> {
        let store = Database::open(&config.db_path)?;
        info!("Result store: {}", config.db_path.display());

        let evidence = FsEvidenceSink::new(&config.evidence_dir).await?;
        info!("Evidence directory: {}", evidence.root().display());

        let launcher = PlaywrightLauncher::new(config.browser.clone());
        if let Err(e) = launcher.check_installed() {
            warn!("{}; runs will fail at browser launch", e);
        }

        let llm = LlmClient::new(&config.llm)?;
        let diagnoser = Diagnoser::new(Arc::new(llm), config.llm.completion_options());

        let orchestrator = Orchestrator::new(
            Arc::new(launcher),
            Arc::new(evidence),
            diagnoser,
            store,
            config.workflow.clone(),
        );
        Ok(Arc::new(Self::new(orchestrator)))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartTestRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTestResponse {
    pub test_id: String,
    pub status: RunStatus,
}

impl From<RunAck> for StartTestResponse {
    fn from(ack: RunAck) -> Self {
        Self {
            test_id: ack.run_id,
            status: ack.final_status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultResponse {
    pub test_id: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: String,
    pub steps: Vec<StepResult>,
    pub ai_analysis: Option<Diagnosis>,
}

impl From<RunRecord> for TestResultResponse {
    fn from(record: RunRecord) -> Self {
        Self {
            start_time: format_timestamp(&record.started_at),
            end_time: format_timestamp(&record.ended_at),
            test_id: record.run_id,
            status: record.final_status,
            steps: record.steps,
            ai_analysis: record.diagnosis,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummaryResponse {
    pub test_id: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: String,
}

impl From<RunSummary> for TestSummaryResponse {
    fn from(summary: RunSummary) -> Self {
        Self {
            start_time: format_timestamp(&summary.started_at),
            end_time: format_timestamp(&summary.ended_at),
            test_id: summary.run_id,
            status: summary.final_status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/test/start", post(start_test_handler))
        .route("/api/test/result/:test_id", get(test_result_handler))
        .route("/api/test/results", get(list_results_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": vidprobe_common::VERSION,
    }))
}

async fn start_test_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<StartTestRequest>, JsonRejection>,
) -> Response {
    let url = match payload {
        Ok(Json(request)) => request.url.trim().to_string(),
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    if url.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "url is required");
    }

    match state.orchestrator.execute_run(&url).await {
        Ok(ack) => (StatusCode::OK, Json(StartTestResponse::from(ack))).into_response(),
        Err(e) => {
            error!("Failed to record run: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn test_result_handler(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Response {
    // Use blocking DB access in a spawn_blocking to avoid holding up the reactor.
    let store = state.store.clone();
    let id = test_id.clone();
    let loaded = match tokio::task::spawn_blocking(move || store.get_by_id(&id)).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Store task failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    match loaded {
        Ok(record) => (StatusCode::OK, Json(TestResultResponse::from(record))).into_response(),
        Err(e) if e.is_not_found() => {
            debug!("No run {}", test_id);
            error_response(StatusCode::NOT_FOUND, "Test not found")
        }
        Err(e) => {
            error!("Failed to load run {}: {}", test_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn list_results_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let store = state.store.clone();
    let listed = match tokio::task::spawn_blocking(move || store.list_recent(limit)).await {
        Ok(listed) => listed,
        Err(e) => {
            error!("Store task failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    match listed {
        Ok(summaries) => {
            let results: Vec<TestSummaryResponse> =
                summaries.into_iter().map(TestSummaryResponse::from).collect();
            (StatusCode::OK, Json(serde_json::json!({ "results": results }))).into_response()
        }
        Err(e) => {
            error!("Failed to list runs: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
