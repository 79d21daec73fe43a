//! Operational controls: worker state, scheduler start/stop, manual sweep.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;

use crate::services::{WorkerHandle, WorkerState};
use crate::state::AppState;
use crate::utils::AppError;

#[derive(Serialize)]
pub struct WorkerStatusResponse {
    pub name: &'static str,
    #[serde(flatten)]
    pub state: WorkerState,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub workers: Vec<WorkerStatusResponse>,
    pub scheduler_running: bool,
}

/// GET /api/v1/workers/status
pub async fn status(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let workers = vec![
        WorkerStatusResponse {
            name: state.classifier_handle.name(),
            state: state.classifier_handle.state(),
        },
        WorkerStatusResponse { name: state.llm_handle.name(), state: state.llm_handle.state() },
    ];
    Ok(Json(StatusResponse { workers, scheduler_running: state.scheduler.is_running() }))
}

fn handle_by_name(state: &AppState, name: &str) -> Result<Arc<WorkerHandle>, AppError> {
    match name {
        "classifier" => Ok(state.classifier_handle.clone()),
        "llm" => Ok(state.llm_handle.clone()),
        other => Err(AppError::not_found(format!("Unknown worker '{}'", other))),
    }
}

#[derive(Serialize)]
struct ActionResponse {
    success: bool,
}

/// POST /api/v1/workers/:name/:action  (action: start|stop|pause|resume)
pub async fn control(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let handle = handle_by_name(&state, &name)?;
    match action.as_str() {
        "start" => handle.start(),
        "stop" => handle.stop(None),
        "pause" => handle.pause(),
        "resume" => handle.resume(),
        other => return Err(AppError::invalid_input(format!("Unknown action '{}'", other))),
    }
    Ok(Json(ActionResponse { success: true }))
}

/// POST /api/v1/scheduler/start
pub async fn start_scheduler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.scheduler.start();
    Ok(Json(ActionResponse { success: true }))
}

/// POST /api/v1/scheduler/stop
pub async fn stop_scheduler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state.scheduler.stop();
    Ok(Json(ActionResponse { success: true }))
}

#[derive(Serialize)]
struct SweepResponse {
    purged: usize,
    failed: usize,
    reindexed: usize,
}

/// POST /api/v1/housekeeping/sweep
pub async fn sweep_now(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let stats = state.housekeeping.sweep().await?;
    Ok(Json(SweepResponse {
        purged: stats.purged,
        failed: stats.failed,
        reindexed: stats.reindexed,
    }))
}
