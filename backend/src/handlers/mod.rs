//! Operational REST surface: thin handlers over the services.

pub mod briefing;
pub mod channels;
pub mod items;
pub mod rules;
pub mod workers;

use axum::{
    Json, Router,
    routing::{get, post, put},
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        // items
        .route("/api/v1/items", get(items::list_items))
        .route("/api/v1/items/search", get(items::search_items))
        .route("/api/v1/items/:id", get(items::get_item))
        .route("/api/v1/items/:id/events", get(items::get_item_events))
        .route("/api/v1/items/:id/read", post(items::mark_read))
        .route("/api/v1/items/:id/unread", post(items::mark_unread))
        .route("/api/v1/items/:id/star", post(items::star))
        .route("/api/v1/items/:id/unstar", post(items::unstar))
        .route("/api/v1/items/:id/archive", post(items::archive))
        // channels and sources
        .route("/api/v1/channels", get(channels::list_channels))
        .route("/api/v1/sources", get(channels::list_sources))
        .route("/api/v1/channels/validate", post(channels::validate_config))
        .route("/api/v1/channels/fetch-all", post(channels::fetch_all_now))
        .route("/api/v1/channels/:id/fetch", post(channels::fetch_channel_now))
        // rules
        .route("/api/v1/rules", get(rules::list_rules).post(rules::create_rule))
        .route("/api/v1/rules/:id", put(rules::update_rule).delete(rules::delete_rule))
        // operational controls
        .route("/api/v1/workers/status", get(workers::status))
        .route("/api/v1/workers/:name/:action", post(workers::control))
        .route("/api/v1/scheduler/start", post(workers::start_scheduler))
        .route("/api/v1/scheduler/stop", post(workers::stop_scheduler))
        .route("/api/v1/housekeeping/sweep", post(workers::sweep_now))
        // briefing
        .route("/api/v1/briefing/preview", post(briefing::preview))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
