use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Actor, User};
use shared_models::error::AppError;
use shared_utils::state::AppState;

use crate::models::{OpenSlotsQuery, ProposeWindowRequest, RejectWindowRequest, UpdateServicesRequest};
use crate::services::{AcceptanceWorkflow, OpenSlotService, WindowService};

// ==============================================================================
// WINDOW HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn propose_window(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<ProposeWindowRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let actor = Actor::from_user(&user);
    let outcome = WindowService::new(&state).propose(&actor, request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "window": outcome.window,
            "materialization": outcome.materialization,
        })),
    ))
}

#[axum::debug_handler]
pub async fn get_window(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let window = WindowService::new(&state).get_window(window_id, &actor).await?;
    Ok(Json(json!(window)))
}

#[axum::debug_handler]
pub async fn list_window_slots(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let slots = WindowService::new(&state).list_window_slots(window_id, &actor).await?;
    Ok(Json(json!({
        "slots": slots,
        "total": slots.len(),
    })))
}

#[axum::debug_handler]
pub async fn list_provider_windows(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let windows = WindowService::new(&state)
        .list_provider_windows(provider_id, &actor)
        .await?;
    Ok(Json(json!({
        "windows": windows,
        "total": windows.len(),
    })))
}

#[axum::debug_handler]
pub async fn list_unmaterialized_windows(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let windows = WindowService::new(&state).list_unmaterialized(&actor).await?;
    Ok(Json(json!({
        "windows": windows,
        "total": windows.len(),
    })))
}

#[axum::debug_handler]
pub async fn accept_window(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let outcome = AcceptanceWorkflow::new(&state).accept(window_id, &actor).await?;
    Ok(Json(json!({
        "success": true,
        "window": outcome.window,
        "materialization": outcome.materialization,
    })))
}

#[axum::debug_handler]
pub async fn reject_window(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
    request: Option<Json<RejectWindowRequest>>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let reason = request.and_then(|Json(body)| body.reason);
    let outcome = AcceptanceWorkflow::new(&state)
        .reject(window_id, &actor, reason)
        .await?;
    Ok(Json(json!({
        "success": true,
        "window": outcome.window,
    })))
}

#[axum::debug_handler]
pub async fn materialize_window(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let report = WindowService::new(&state)
        .materialize_slots(window_id, &actor)
        .await?;
    Ok(Json(json!({
        "success": report.is_complete(),
        "report": report,
    })))
}

#[axum::debug_handler]
pub async fn update_window_services(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateServicesRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let outcome = WindowService::new(&state)
        .reconfigure_services(window_id, &actor, request.services)
        .await?;
    Ok(Json(json!({
        "success": true,
        "window": outcome.window,
        "materialization": outcome.materialization,
    })))
}

#[axum::debug_handler]
pub async fn retire_window(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let window = WindowService::new(&state).retire_window(window_id, &actor).await?;
    Ok(Json(json!({
        "success": true,
        "window": window,
    })))
}

#[axum::debug_handler]
pub async fn delete_window(
    State(state): State<Arc<AppState>>,
    Path(window_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    let actor = Actor::from_user(&user);
    WindowService::new(&state).delete_window(window_id, &actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// PUBLIC READ MODELS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_open_slots(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<Uuid>,
    Query(query): Query<OpenSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = OpenSlotService::new(&state).open_slots(provider_id, query).await?;
    Ok(Json(json!({
        "provider_id": provider_id,
        "slots": slots,
        "total": slots.len(),
    })))
}

#[axum::debug_handler]
pub async fn get_open_slot_counts(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let counts = OpenSlotService::new(&state).open_slot_counts(provider_id).await?;
    Ok(Json(json!({
        "provider_id": provider_id,
        "services": counts,
    })))
}
