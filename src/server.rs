use crate::runner::PipelineRunner;
use crate::scheduler::Scheduler;
use crate::types::{PipelineError, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "oxinews-pipeline";

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<PipelineRunner>,
    pub scheduler: Arc<Scheduler>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/run", get(run_pipeline))
        .route("/run_new", get(run_new_pipeline))
        .route("/schedule_check", get(schedule_check))
        .with_state(state)
}

/// Bind and serve the trigger surface until the process exits.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Trigger surface listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"status": "healthy", "service": SERVICE_NAME})),
    )
}

#[derive(Debug, Deserialize)]
struct RunParams {
    pipeline_id: Option<String>,
}

/// GET /run?pipeline_id=... runs one pipeline immediately, schedule ignored.
async fn run_pipeline(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> (StatusCode, Json<Value>) {
    trigger_run(&state, params, None).await
}

/// GET /run_new?pipeline_id=... runs only a pipeline that has never
/// delivered; anything at a nonzero count reports not found.
async fn run_new_pipeline(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> (StatusCode, Json<Value>) {
    trigger_run(&state, params, Some(0)).await
}

async fn trigger_run(
    state: &AppState,
    params: RunParams,
    delivery_count: Option<i64>,
) -> (StatusCode, Json<Value>) {
    let pipeline_id = match params.pipeline_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "pipeline_id parameter is required"})),
            );
        }
    };

    info!("Manual run requested for pipeline {}", pipeline_id);

    match state.runner.run_by_id(&pipeline_id, delivery_count).await {
        Ok(result) => {
            let status = if result.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(json!(result)))
        }
        Err(e) => {
            warn!("Run request for pipeline {} rejected: {}", pipeline_id, e);
            (
                error_status(&e),
                Json(json!({
                    "success": false,
                    "pipeline_id": pipeline_id,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

/// GET /schedule_check evaluates all pipelines immediately, the same pass a
/// scheduler tick performs.
async fn schedule_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    info!("Manual schedule check requested");

    match state.scheduler.run_due_pipelines().await {
        Ok(results) => {
            let entries: Vec<Value> = results
                .iter()
                .map(|result| json!({"pipeline_id": result.pipeline_id, "result": result}))
                .collect();
            (
                StatusCode::OK,
                Json(json!({"success": true, "results": entries})),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": e.to_string()})),
        ),
    }
}

fn error_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::AlreadyRunning(_) => StatusCode::CONFLICT,
        PipelineError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
