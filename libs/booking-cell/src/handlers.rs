use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Actor, User};
use shared_models::error::AppError;
use shared_utils::extractor::actor_from_token;
use shared_utils::state::AppState;

use crate::models::{CancelBookingRequest, ClaimSlotRequest};
use crate::services::{BookingClaimService, BookingLifecycleService};

// ==============================================================================
// CLAIM
// ==============================================================================

/// Guests claim without a token; a bearer token books as the authenticated user.
#[axum::debug_handler]
pub async fn claim_slot(
    State(state): State<Arc<AppState>>,
    Path(slot_id): Path<Uuid>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    request: Option<Json<ClaimSlotRequest>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token = auth.as_ref().map(|TypedHeader(auth)| auth.token());
    let actor = actor_from_token(&state, token)?;
    let request = request.map(|Json(body)| body).unwrap_or_default();

    let outcome = BookingClaimService::new(&state)
        .claim_slot(slot_id, &actor, request)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": outcome.booking,
            "requires_confirmation": outcome.requires_confirmation,
        })),
    ))
}

// ==============================================================================
// BOOKING LIFECYCLE
// ==============================================================================

#[axum::debug_handler]
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let booking = BookingLifecycleService::new(&state)
        .get_booking(booking_id, &actor)
        .await?;
    Ok(Json(json!(booking)))
}

#[axum::debug_handler]
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Extension(user): Extension<User>,
    request: Option<Json<CancelBookingRequest>>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let reason = request.and_then(|Json(body)| body.reason);
    let outcome = BookingClaimService::new(&state)
        .cancel_booking(booking_id, &actor, reason)
        .await?;
    Ok(Json(json!({
        "success": true,
        "booking": outcome.booking,
        "slot_released": outcome.slot_released,
    })))
}

#[axum::debug_handler]
pub async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let booking = BookingLifecycleService::new(&state)
        .confirm_booking(booking_id, &actor)
        .await?;
    Ok(Json(json!({
        "success": true,
        "booking": booking,
    })))
}

#[axum::debug_handler]
pub async fn complete_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let booking = BookingLifecycleService::new(&state)
        .complete_booking(booking_id, &actor)
        .await?;
    Ok(Json(json!({
        "success": true,
        "booking": booking,
    })))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = Actor::from_user(&user);
    let booking = BookingLifecycleService::new(&state)
        .mark_no_show(booking_id, &actor)
        .await?;
    Ok(Json(json!({
        "success": true,
        "booking": booking,
    })))
}
