//! Briefing preview handler.

use axum::{Json, extract::State, response::IntoResponse};

use crate::services::BriefingRequest;
use crate::state::AppState;
use crate::utils::AppError;

/// POST /api/v1/briefing/preview
pub async fn preview(
    State(state): State<AppState>,
    Json(req): Json<BriefingRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.hours_back <= 0 {
        return Err(AppError::invalid_input("hours_back must be > 0"));
    }
    Ok(Json(state.briefing.build(req).await?))
}
