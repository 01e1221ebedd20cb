use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn availability_routes(state: Arc<AppState>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/providers/{provider_id}/open-slots", get(handlers::get_open_slots))
        .route(
            "/providers/{provider_id}/open-slot-counts",
            get(handlers::get_open_slot_counts),
        );

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/windows", post(handlers::propose_window))
        .route("/windows/unmaterialized", get(handlers::list_unmaterialized_windows))
        .route(
            "/windows/{window_id}",
            get(handlers::get_window).delete(handlers::delete_window),
        )
        .route("/windows/{window_id}/slots", get(handlers::list_window_slots))
        .route("/windows/{window_id}/accept", post(handlers::accept_window))
        .route("/windows/{window_id}/reject", post(handlers::reject_window))
        .route("/windows/{window_id}/materialize", post(handlers::materialize_window))
        .route("/windows/{window_id}/services", put(handlers::update_window_services))
        .route("/windows/{window_id}/retire", post(handlers::retire_window))
        .route("/providers/{provider_id}/windows", get(handlers::list_provider_windows))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
