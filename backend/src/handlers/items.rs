//! Item read/review handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::models::Priority;
use crate::state::AppState;
use crate::utils::AppError;

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub priority: Option<String>,
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/v1/items
pub async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ListItemsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let priority = match &query.priority {
        Some(raw) => Some(
            Priority::parse(raw)
                .ok_or_else(|| AppError::invalid_input(format!("Unknown priority '{}'", raw)))?,
        ),
        None => None,
    };

    let items = state
        .items
        .list(
            priority,
            query.unread_only,
            query.limit.unwrap_or(100).clamp(1, 500),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(serde::Serialize)]
pub struct SearchHit {
    pub score: f64,
    #[serde(flatten)]
    pub item: crate::models::Item,
}

/// GET /api/v1/items/search
///
/// Semantic search over the retrieval index; the query is embedded with
/// the same retrieval model the classifier uses.
pub async fn search_items(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    if query.q.trim().is_empty() {
        return Err(AppError::invalid_input("Query must not be empty"));
    }
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let vector = state.embedder.embed_retrieval(&query.q, "").await?;
    let ranked = state.retrieval_index.top_k(&vector, limit).await;

    let ids: Vec<i64> = ranked.iter().map(|(id, _)| *id).collect();
    let scores: std::collections::HashMap<i64, f64> = ranked.into_iter().collect();
    let items = state.items.by_ids(&ids).await?;

    let hits: Vec<SearchHit> = items
        .into_iter()
        .map(|item| SearchHit { score: scores.get(&item.id).copied().unwrap_or(0.0), item })
        .collect();
    Ok(Json(hits))
}

/// GET /api/v1/items/:id
pub async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state.items.detail(item_id).await?;
    Ok(Json(detail))
}

/// GET /api/v1/items/:id/events
pub async fn get_item_events(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.items.events_for(item_id).await?;
    Ok(Json(events))
}

/// POST /api/v1/items/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.items.set_read(item_id, true).await?))
}

/// POST /api/v1/items/:id/unread
pub async fn mark_unread(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.items.set_read(item_id, false).await?))
}

/// POST /api/v1/items/:id/star
pub async fn star(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.items.set_starred(item_id, true).await?))
}

/// POST /api/v1/items/:id/unstar
pub async fn unstar(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.items.set_starred(item_id, false).await?))
}

/// POST /api/v1/items/:id/archive
pub async fn archive(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.items.set_archived(item_id, true).await?))
}
