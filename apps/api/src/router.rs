use std::sync::Arc;

use axum::{
    Json, Router,
    routing::get,
};
use serde_json::{json, Value};

use availability_cell::router::availability_routes;
use booking_cell::router::booking_routes;
use calendar_sync_cell::router::calendar_sync_routes;
use shared_utils::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Slot engine API is running!" }))
        .route("/health", get(health))
        .nest("/availability", availability_routes(state.clone()))
        .nest("/bookings", booking_routes(state.clone()))
        .nest("/calendar-sync", calendar_sync_routes(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
