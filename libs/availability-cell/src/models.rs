use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::{AppError, StoreError};
use shared_models::scheduling::{
    AvailabilityWindow, MaterializationState, SchedulingRule, ServiceConfig, WindowOwner,
    WindowStatus,
};

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeWindowRequest {
    pub provider_id: Uuid,
    /// Defaults to the provider for providers and to the caller's
    /// organization for organization members.
    #[serde(default)]
    pub owner: Option<WindowOwner>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub rule: SchedulingRule,
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RejectWindowRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateServicesRequest {
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenSlotsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub location_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
}

// ==============================================================================
// RESULT MODELS
// ==============================================================================

/// One interval produced by the scheduling-rule evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaterializationReport {
    pub window_id: Uuid,
    pub state: MaterializationState,
    pub slots_created: usize,
    pub slots_retired: usize,
    pub slots_unchanged: usize,
    /// Candidates not created because a booked slot of the same service
    /// already covers part of their interval.
    pub skipped_conflicts: Vec<CandidateSlot>,
    pub errors: Vec<String>,
    pub attempts: u32,
}

impl MaterializationReport {
    pub fn is_complete(&self) -> bool {
        self.state == MaterializationState::Complete
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub window: AvailabilityWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materialization: Option<MaterializationReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenSlotCount {
    pub service_id: Uuid,
    pub open_slots: usize,
    pub next_start_time: Option<DateTime<Utc>>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid service configuration: {0}")]
    InvalidService(String),

    #[error("Availability window not found")]
    WindowNotFound,

    #[error("Window is not pending acceptance (current status: {0})")]
    NotPendingAcceptance(WindowStatus),

    #[error("Window is not accepted (current status: {0})")]
    NotAccepted(WindowStatus),

    #[error("Window has been retired")]
    WindowRetired,

    #[error("Window overlaps existing window {0}")]
    OverlappingWindow(Uuid),

    #[error("Window has booked slots and cannot be deleted")]
    WindowHasBookings,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AvailabilityError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AvailabilityError::InvalidWindow(_) | AvailabilityError::InvalidService(_)
        )
    }

    pub fn is_domain_state(&self) -> bool {
        matches!(
            self,
            AvailabilityError::NotPendingAcceptance(_)
                | AvailabilityError::NotAccepted(_)
                | AvailabilityError::WindowRetired
                | AvailabilityError::OverlappingWindow(_)
                | AvailabilityError::WindowHasBookings
        )
    }
}

impl From<StoreError> for AvailabilityError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(_) => AvailabilityError::WindowNotFound,
            StoreError::ForeignKeyViolation(_) => AvailabilityError::WindowHasBookings,
            other => AvailabilityError::Storage(other.to_string()),
        }
    }
}

impl From<AvailabilityError> for AppError {
    fn from(error: AvailabilityError) -> Self {
        match error {
            AvailabilityError::InvalidWindow(_) | AvailabilityError::InvalidService(_) => {
                AppError::ValidationError(error.to_string())
            }
            AvailabilityError::WindowNotFound => AppError::NotFound(error.to_string()),
            AvailabilityError::OverlappingWindow(_) => AppError::Conflict(error.to_string()),
            AvailabilityError::NotPendingAcceptance(_)
            | AvailabilityError::NotAccepted(_)
            | AvailabilityError::WindowRetired
            | AvailabilityError::WindowHasBookings => AppError::InvalidState(error.to_string()),
            AvailabilityError::Unauthorized(msg) => AppError::Forbidden(msg),
            AvailabilityError::Storage(msg) => AppError::Database(msg),
        }
    }
}
