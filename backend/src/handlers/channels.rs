//! Channel and source handlers, including manual fetch triggers.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::models::ConnectorKind;
use crate::state::AppState;
use crate::utils::AppError;

/// GET /api/v1/channels
pub async fn list_channels(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.channels.list().await?))
}

/// GET /api/v1/sources
pub async fn list_sources(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.channels.list_sources().await?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateConfigRequest {
    pub kind: ConnectorKind,
    pub config: HashMap<String, serde_json::Value>,
}

/// POST /api/v1/channels/validate
pub async fn validate_config(
    State(state): State<AppState>,
    Json(req): Json<ValidateConfigRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.channels.validate_config(req.kind, &req.config)))
}

#[derive(Serialize)]
struct FetchTriggeredResponse {
    success: bool,
    dispatched: usize,
}

/// POST /api/v1/channels/:id/fetch
pub async fn fetch_channel_now(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.scheduler.fetch_channel_now(channel_id).await?;
    Ok(Json(FetchTriggeredResponse { success: true, dispatched: 1 }))
}

/// POST /api/v1/channels/fetch-all
pub async fn fetch_all_now(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let dispatched = state.scheduler.fetch_all_now().await?;
    Ok(Json(FetchTriggeredResponse { success: true, dispatched }))
}
