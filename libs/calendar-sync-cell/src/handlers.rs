use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Actor, User};
use shared_models::error::AppError;
use shared_utils::state::AppState;

use crate::models::BusySnapshotRequest;
use crate::services::ExternalCalendarReconciler;

#[axum::debug_handler]
pub async fn submit_busy_snapshot(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<BusySnapshotRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let report = ExternalCalendarReconciler::new(&state)
        .reconcile_external_busy(provider_id, &actor, request)
        .await?;
    Ok(Json(json!({
        "success": report.errors.is_empty(),
        "report": report,
    })))
}

#[axum::debug_handler]
pub async fn get_busy_snapshots(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let snapshots = ExternalCalendarReconciler::new(&state)
        .busy_snapshots(provider_id, &actor)
        .await?;
    Ok(Json(json!({
        "provider_id": provider_id,
        "snapshots": snapshots,
    })))
}
