use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::{AppError, StoreError};
use shared_models::scheduling::TimeRange;

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

/// Busy time reported by an external calendar for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusySnapshotRequest {
    /// Restricts the snapshot to slots at one location.
    #[serde(default)]
    pub location_id: Option<Uuid>,
    pub busy_intervals: Vec<TimeRange>,
    /// Period the calendar was read for; defaults to everything not yet ended.
    #[serde(default)]
    pub horizon: Option<TimeRange>,
}

// ==============================================================================
// RESULT MODELS
// ==============================================================================

/// A booked slot that the external calendar now reports as busy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalConflict {
    pub slot_id: Uuid,
    pub booking_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub busy_interval: TimeRange,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationReport {
    pub provider_id: Uuid,
    pub location_id: Option<Uuid>,
    pub slots_blocked: usize,
    pub slots_released: usize,
    pub slots_unchanged: usize,
    pub conflicts: Vec<ExternalConflict>,
    pub errors: Vec<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("Invalid busy interval: {0}")]
    InvalidInterval(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ReconcileError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ReconcileError::InvalidInterval(_))
    }
}

impl From<StoreError> for ReconcileError {
    fn from(error: StoreError) -> Self {
        ReconcileError::Storage(error.to_string())
    }
}

impl From<ReconcileError> for AppError {
    fn from(error: ReconcileError) -> Self {
        match error {
            ReconcileError::InvalidInterval(_) => AppError::ValidationError(error.to_string()),
            ReconcileError::Unauthorized(msg) => AppError::Forbidden(msg),
            ReconcileError::Storage(msg) => AppError::Database(msg),
        }
    }
}
