use serde::{Deserialize, Serialize};

use shared_models::error::{AppError, StoreError};
use shared_models::scheduling::{Booking, BookingStatus};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Contact details of an unauthenticated guest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuestDetails {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimSlotRequest {
    /// Required when the caller is not authenticated.
    #[serde(default)]
    pub guest: Option<GuestDetails>,
    /// Contact details of an authenticated client.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// ==============================================================================
// RESULT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub booking: Booking,
    /// `false` when the slot was claimed by a pre-authorized actor and
    /// needs no provider confirmation.
    pub requires_confirmation: bool,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BookingError {
    #[error("Slot not found")]
    SlotNotFound,

    #[error("Booking not found")]
    BookingNotFound,

    #[error("Slot is no longer available")]
    SlotUnavailable,

    #[error("Slot has already started")]
    SlotInPast,

    #[error("Invalid client details: {0}")]
    InvalidClient(String),

    #[error("Booking cannot move from {from} to {to}")]
    InvalidStatusTransition { from: BookingStatus, to: BookingStatus },

    #[error("Booking can only be closed after the slot has ended")]
    SlotNotEnded,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn is_validation(&self) -> bool {
        matches!(self, BookingError::InvalidClient(_) | BookingError::SlotInPast)
    }

    pub fn is_domain_state(&self) -> bool {
        matches!(
            self,
            BookingError::InvalidStatusTransition { .. } | BookingError::SlotNotEnded
        )
    }
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => BookingError::BookingNotFound,
            StoreError::ConditionFailed(_) => BookingError::SlotUnavailable,
            other => BookingError::Storage(other.to_string()),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(error: BookingError) -> Self {
        match error {
            BookingError::InvalidClient(_) | BookingError::SlotInPast => {
                AppError::ValidationError(error.to_string())
            }
            BookingError::SlotNotFound | BookingError::BookingNotFound => {
                AppError::NotFound(error.to_string())
            }
            BookingError::SlotUnavailable => AppError::SlotUnavailable(error.to_string()),
            BookingError::InvalidStatusTransition { .. } | BookingError::SlotNotEnded => {
                AppError::InvalidState(error.to_string())
            }
            BookingError::Unauthorized(msg) => AppError::Forbidden(msg),
            BookingError::Storage(msg) => AppError::Database(msg),
        }
    }
}
