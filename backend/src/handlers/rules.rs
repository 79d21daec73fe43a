//! Rule management handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::models::{CreateRuleRequest, UpdateRuleRequest};
use crate::state::AppState;
use crate::utils::AppError;

/// GET /api/v1/rules
pub async fn list_rules(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.rules.list().await?))
}

/// POST /api/v1/rules
pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let rule = state.rules.create(req).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// PUT /api/v1/rules/:id
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
    Json(req): Json<UpdateRuleRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.rules.update(rule_id, req).await?))
}

/// DELETE /api/v1/rules/:id
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.rules.delete(rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
