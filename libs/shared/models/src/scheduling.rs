use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// TIME RANGES
// ==============================================================================

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if end <= start {
            return Err(format!("End time {} must be after start time {}", end, start));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

// ==============================================================================
// AVAILABILITY WINDOWS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Pending,
    Accepted,
    Rejected,
}

impl WindowStatus {
    pub fn valid_transitions(&self) -> &'static [WindowStatus] {
        match self {
            WindowStatus::Pending => &[WindowStatus::Accepted, WindowStatus::Rejected],
            // Terminal states
            WindowStatus::Accepted => &[],
            WindowStatus::Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, next: WindowStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Pending => "pending",
            WindowStatus::Accepted => "accepted",
            WindowStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entity a window is published under. Exactly one variant applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowOwner {
    Provider,
    Organization { organization_id: Uuid },
    Location { location_id: Uuid, organization_id: Option<Uuid> },
}

impl WindowOwner {
    pub fn kind(&self) -> &'static str {
        match self {
            WindowOwner::Provider => "provider",
            WindowOwner::Organization { .. } => "organization",
            WindowOwner::Location { .. } => "location",
        }
    }

    pub fn organization_id(&self) -> Option<Uuid> {
        match self {
            WindowOwner::Provider => None,
            WindowOwner::Organization { organization_id } => Some(*organization_id),
            WindowOwner::Location { organization_id, .. } => *organization_id,
        }
    }

    pub fn location_id(&self) -> Option<Uuid> {
        match self {
            WindowOwner::Location { location_id, .. } => Some(*location_id),
            _ => None,
        }
    }

    /// Rebuild the owner from its flat storage columns, rejecting combinations
    /// that do not describe exactly one variant.
    pub fn from_columns(
        kind: &str,
        organization_id: Option<Uuid>,
        location_id: Option<Uuid>,
    ) -> Result<Self, String> {
        match (kind, organization_id, location_id) {
            ("provider", None, None) => Ok(WindowOwner::Provider),
            ("organization", Some(organization_id), None) => {
                Ok(WindowOwner::Organization { organization_id })
            }
            ("location", organization_id, Some(location_id)) => Ok(WindowOwner::Location {
                location_id,
                organization_id,
            }),
            (kind, org, loc) => Err(format!(
                "Invalid window owner: kind={} organization_id={:?} location_id={:?}",
                kind, org, loc
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proposer {
    Provider,
    Organization { organization_id: Uuid, proposed_by: String },
}

impl Proposer {
    pub fn is_organization(&self) -> bool {
        matches!(self, Proposer::Organization { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulingRule {
    /// Slots packed back-to-back per service duration, optionally separated
    /// by a fixed interval.
    Continuous {
        #[serde(default)]
        interval_minutes: Option<i32>,
    },
}

impl Default for SchedulingRule {
    fn default() -> Self {
        SchedulingRule::Continuous { interval_minutes: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub service_id: Uuid,
    pub duration_minutes: i32,
    #[serde(default)]
    pub gap_minutes: Option<i32>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default = "default_true")]
    pub in_person: bool,
    #[serde(default)]
    pub location_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationState {
    /// Window has not been accepted, nothing to materialize yet.
    NotRequired,
    Pending,
    Complete,
    Partial,
    Failed,
}

impl MaterializationState {
    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            MaterializationState::Pending | MaterializationState::Partial | MaterializationState::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub owner: WindowOwner,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub rule: SchedulingRule,
    pub services: Vec<ServiceConfig>,
    pub status: WindowStatus,
    pub proposer: Proposer,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub materialization: MaterializationState,
    pub materialization_error: Option<String>,
    pub last_materialized_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    pub fn range(&self) -> TimeRange {
        TimeRange { start: self.start_time, end: self.end_time }
    }

    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// Live windows block overlapping proposals for the same provider.
    pub fn is_live(&self) -> bool {
        !self.is_retired() && self.status != WindowStatus::Rejected
    }

    pub fn organization_id(&self) -> Option<Uuid> {
        self.owner.organization_id()
    }

    pub fn location_id(&self) -> Option<Uuid> {
        self.owner.location_id()
    }
}

/// Fields written together with a window status transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowTransition {
    Accept { by: String, at: DateTime<Utc> },
    Reject { by: String, at: DateTime<Utc>, reason: Option<String> },
}

impl WindowTransition {
    pub fn target(&self) -> WindowStatus {
        match self {
            WindowTransition::Accept { .. } => WindowStatus::Accepted,
            WindowTransition::Reject { .. } => WindowStatus::Rejected,
        }
    }

    pub fn apply(&self, window: &mut AvailabilityWindow) {
        match self {
            WindowTransition::Accept { by, at } => {
                window.status = WindowStatus::Accepted;
                window.accepted_by = Some(by.clone());
                window.accepted_at = Some(*at);
                window.materialization = MaterializationState::Pending;
                window.updated_at = *at;
            }
            WindowTransition::Reject { by, at, reason } => {
                window.status = WindowStatus::Rejected;
                window.rejected_by = Some(by.clone());
                window.rejected_at = Some(*at);
                window.rejection_reason = reason.clone();
                window.updated_at = *at;
            }
        }
    }
}

/// Result of a materialization run as recorded on the window.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationRecord {
    pub state: MaterializationState,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
    BlockedExternal,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::BlockedExternal => "blocked_external",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculatedSlot {
    pub id: Uuid,
    pub window_id: Uuid,
    pub provider_id: Uuid,
    pub location_id: Option<Uuid>,
    pub service_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SlotStatus,
    pub price: Option<f64>,
    pub duration_minutes: i32,
    pub online: bool,
    pub in_person: bool,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl CalculatedSlot {
    pub fn range(&self) -> TimeRange {
        TimeRange { start: self.start_time, end: self.end_time }
    }

    pub fn is_live(&self) -> bool {
        self.retired_at.is_none()
    }

    pub fn is_claimable(&self) -> bool {
        self.is_live() && self.status == SlotStatus::Available
    }
}

// ==============================================================================
// BOOKINGS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    /// Active bookings hold their slot.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientIdentity {
    Registered {
        user_id: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        phone: Option<String>,
    },
    Guest {
        name: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        phone: Option<String>,
    },
}

impl ClientIdentity {
    pub fn email(&self) -> Option<&str> {
        match self {
            ClientIdentity::Registered { email, .. } | ClientIdentity::Guest { email, .. } => {
                email.as_deref()
            }
        }
    }

    pub fn phone(&self) -> Option<&str> {
        match self {
            ClientIdentity::Registered { phone, .. } | ClientIdentity::Guest { phone, .. } => {
                phone.as_deref()
            }
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            ClientIdentity::Registered { user_id, .. } => Some(user_id),
            ClientIdentity::Guest { .. } => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, ClientIdentity::Guest { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub provider_id: Uuid,
    pub client: ClientIdentity,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub slot_start_time: DateTime<Utc>,
    pub slot_end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

/// Booking row written by an atomic claim.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBooking {
    pub id: Uuid,
    pub slot_id: Uuid,
    pub client: ClientIdentity,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the atomic cancel-and-release write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationOutcome {
    pub booking: Booking,
    pub slot_released: bool,
}

// ==============================================================================
// EXTERNAL BUSY TIME
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusySnapshot {
    pub provider_id: Uuid,
    #[serde(default)]
    pub location_id: Option<Uuid>,
    pub busy_intervals: Vec<TimeRange>,
    #[serde(default)]
    pub horizon: Option<TimeRange>,
    pub received_at: DateTime<Utc>,
}

impl BusySnapshot {
    /// Whether a slot falls under this snapshot's provider/location scope
    /// and inside its horizon, when one was reported.
    pub fn covers_slot(&self, slot: &CalculatedSlot) -> bool {
        slot.provider_id == self.provider_id
            && match self.location_id {
                Some(location_id) => slot.location_id == Some(location_id),
                None => true,
            }
            && self.horizon.map_or(true, |horizon| horizon.overlaps(&slot.range()))
    }

    /// The first busy interval blocking `slot`, if this snapshot covers it.
    pub fn busy_interval_for(&self, slot: &CalculatedSlot) -> Option<TimeRange> {
        if !self.covers_slot(slot) {
            return None;
        }
        let range = slot.range();
        self.busy_intervals.iter().find(|busy| busy.overlaps(&range)).copied()
    }

    /// Latest end among the busy intervals and the horizon.
    pub fn latest_end(&self) -> Option<DateTime<Utc>> {
        self.busy_intervals
            .iter()
            .chain(self.horizon.iter())
            .map(|interval| interval.end)
            .max()
    }
}
