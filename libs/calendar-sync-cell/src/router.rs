use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn calendar_sync_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/providers/{provider_id}/busy",
            get(handlers::get_busy_snapshots).post(handlers::submit_busy_snapshot),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
