//! Persistence ports for the scheduling core.
//!
//! Every status change exposed here is a conditional write: adapters apply it
//! only when the stored row still holds the expected state, and report whether
//! it did. The booking claim and the cancel-and-release are single atomic
//! operations at the storage layer, never read-then-write sequences.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shared_models::error::StoreError;
use shared_models::scheduling::{
    AvailabilityWindow, Booking, BookingStatus, BusySnapshot, CalculatedSlot,
    CancellationOutcome, MaterializationRecord, NewBooking, ServiceConfig, SlotStatus, TimeRange,
    WindowTransition,
};

#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, StoreError>;

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError>;

    async fn list_provider_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, StoreError>;

    /// Live (not rejected, not retired) windows of the provider intersecting `range`.
    async fn find_overlapping_windows(
        &self,
        provider_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;

    /// Applies the transition only while the window is still pending.
    /// Returns `None` when the condition did not hold.
    async fn transition_window(
        &self,
        window_id: Uuid,
        transition: &WindowTransition,
    ) -> Result<Option<AvailabilityWindow>, StoreError>;

    /// Replaces the service configuration of a live window.
    async fn update_window_services(
        &self,
        window_id: Uuid,
        services: &[ServiceConfig],
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError>;

    async fn record_materialization(
        &self,
        window_id: Uuid,
        record: &MaterializationRecord,
    ) -> Result<(), StoreError>;

    /// Accepted, live windows whose last materialization did not complete.
    async fn list_unmaterialized_windows(&self) -> Result<Vec<AvailabilityWindow>, StoreError>;

    /// Marks the window retired and retires every slot without an active booking.
    async fn retire_window(
        &self,
        window_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError>;

    /// Hard delete of the window and its slots. Fails with
    /// `ForeignKeyViolation` when any slot was ever booked.
    async fn delete_window(&self, window_id: Uuid) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<CalculatedSlot>, StoreError>;

    /// Live slots of a window ordered by service, then start time.
    async fn list_window_slots(&self, window_id: Uuid) -> Result<Vec<CalculatedSlot>, StoreError>;

    /// Fails with `UniqueViolation` when a live slot with the same
    /// window, service and start already exists.
    async fn insert_slot(&self, slot: &CalculatedSlot) -> Result<CalculatedSlot, StoreError>;

    /// Soft-removes a live slot that is not booked.
    async fn retire_slot(&self, slot_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Compare-and-swap on the status of a live slot.
    async fn transition_slot(
        &self,
        slot_id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
    ) -> Result<bool, StoreError>;

    /// Live slots of the provider intersecting `range`, ordered by start time.
    async fn list_provider_slots(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
        range: TimeRange,
    ) -> Result<Vec<CalculatedSlot>, StoreError>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Atomically moves the slot from available to booked and inserts the
    /// booking. Fails with `ConditionFailed` when the slot is not claimable.
    async fn claim_slot(&self, booking: &NewBooking) -> Result<Booking, StoreError>;

    /// Atomically cancels an active booking and re-opens its slot unless the
    /// slot or its window has been retired.
    async fn cancel_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, StoreError>;

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn active_booking_for_slot(&self, slot_id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Compare-and-swap on the booking status.
    async fn transition_booking(
        &self,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError>;
}

#[async_trait]
pub trait BusySnapshotStore: Send + Sync {
    /// Replaces the stored snapshot for the snapshot's provider/location key.
    async fn save_busy_snapshot(&self, snapshot: &BusySnapshot) -> Result<(), StoreError>;

    async fn latest_busy_snapshot(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Option<BusySnapshot>, StoreError>;

    /// Every stored snapshot of the provider, across locations.
    async fn provider_busy_snapshots(&self, provider_id: Uuid) -> Result<Vec<BusySnapshot>, StoreError>;
}

pub trait SchedulingStore: WindowStore + SlotStore + BookingStore + BusySnapshotStore {}

impl<T> SchedulingStore for T where T: WindowStore + SlotStore + BookingStore + BusySnapshotStore {}
