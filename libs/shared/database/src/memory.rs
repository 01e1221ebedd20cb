use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::error::StoreError;
use shared_models::scheduling::{
    AvailabilityWindow, Booking, BookingStatus, BusySnapshot, CalculatedSlot,
    CancellationOutcome, MaterializationRecord, NewBooking, ServiceConfig, SlotStatus, TimeRange,
    WindowStatus, WindowTransition,
};

use crate::store::{BookingStore, BusySnapshotStore, SlotStore, WindowStore};

#[derive(Default)]
struct Tables {
    windows: HashMap<Uuid, AvailabilityWindow>,
    slots: HashMap<Uuid, CalculatedSlot>,
    bookings: HashMap<Uuid, Booking>,
    busy: HashMap<(Uuid, Option<Uuid>), BusySnapshot>,
}

impl Tables {
    fn has_active_booking(&self, slot_id: Uuid) -> bool {
        self.bookings
            .values()
            .any(|booking| booking.slot_id == slot_id && booking.status.is_active())
    }

    fn window_retired(&self, window_id: Uuid) -> bool {
        self.windows
            .get(&window_id)
            .map(|window| window.is_retired())
            .unwrap_or(true)
    }
}

/// Single-node storage backend.
///
/// Every operation runs under one write lock, which gives it the same
/// all-or-nothing semantics the Postgres functions provide for the
/// PostgREST backend. Used for local runs and tests.
#[derive(Default)]
pub struct InMemorySchedulingStore {
    tables: RwLock<Tables>,
}

impl InMemorySchedulingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every booking ever written for a slot, newest first.
    pub async fn bookings_for_slot(&self, slot_id: Uuid) -> Vec<Booking> {
        let tables = self.tables.read().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|booking| booking.slot_id == slot_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bookings
    }

    /// Number of slot rows of a window, including retired ones.
    pub async fn slot_row_count(&self, window_id: Uuid) -> usize {
        let tables = self.tables.read().await;
        tables.slots.values().filter(|slot| slot.window_id == window_id).count()
    }
}

#[async_trait]
impl WindowStore for InMemorySchedulingStore {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.windows.contains_key(&window.id) {
            return Err(StoreError::UniqueViolation(format!("window {}", window.id)));
        }
        tables.windows.insert(window.id, window.clone());
        Ok(window.clone())
    }

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError> {
        Ok(self.tables.read().await.windows.get(&window_id).cloned())
    }

    async fn list_provider_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let tables = self.tables.read().await;
        let mut windows: Vec<AvailabilityWindow> = tables
            .windows
            .values()
            .filter(|window| window.provider_id == provider_id)
            .cloned()
            .collect();
        windows.sort_by_key(|window| window.start_time);
        Ok(windows)
    }

    async fn find_overlapping_windows(
        &self,
        provider_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .windows
            .values()
            .filter(|window| {
                window.provider_id == provider_id && window.is_live() && window.range().overlaps(&range)
            })
            .cloned()
            .collect())
    }

    async fn transition_window(
        &self,
        window_id: Uuid,
        transition: &WindowTransition,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(window) = tables.windows.get_mut(&window_id) else {
            return Ok(None);
        };
        if window.status != WindowStatus::Pending || window.is_retired() {
            return Ok(None);
        }
        transition.apply(window);
        Ok(Some(window.clone()))
    }

    async fn update_window_services(
        &self,
        window_id: Uuid,
        services: &[ServiceConfig],
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(window) = tables.windows.get_mut(&window_id) else {
            return Ok(None);
        };
        if !window.is_live() {
            return Ok(None);
        }
        window.services = services.to_vec();
        window.updated_at = at;
        Ok(Some(window.clone()))
    }

    async fn record_materialization(
        &self,
        window_id: Uuid,
        record: &MaterializationRecord,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let window = tables
            .windows
            .get_mut(&window_id)
            .ok_or_else(|| StoreError::NotFound(format!("window {}", window_id)))?;
        window.materialization = record.state;
        window.materialization_error = record.error.clone();
        window.last_materialized_at = Some(record.at);
        window.updated_at = record.at;
        Ok(())
    }

    async fn list_unmaterialized_windows(&self) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let tables = self.tables.read().await;
        let mut windows: Vec<AvailabilityWindow> = tables
            .windows
            .values()
            .filter(|window| {
                window.status == WindowStatus::Accepted
                    && !window.is_retired()
                    && window.materialization.needs_attention()
            })
            .cloned()
            .collect();
        windows.sort_by_key(|window| window.start_time);
        Ok(windows)
    }

    async fn retire_window(
        &self,
        window_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        let mut tables = self.tables.write().await;
        let booked: Vec<Uuid> = tables
            .slots
            .values()
            .filter(|slot| slot.window_id == window_id)
            .map(|slot| slot.id)
            .filter(|slot_id| tables.has_active_booking(*slot_id))
            .collect();

        let Some(window) = tables.windows.get_mut(&window_id) else {
            return Ok(None);
        };
        if window.retired_at.is_none() {
            window.retired_at = Some(at);
            window.updated_at = at;
        }
        let window = window.clone();

        let mut retired = 0usize;
        for slot in tables.slots.values_mut() {
            if slot.window_id == window_id && slot.retired_at.is_none() && !booked.contains(&slot.id) {
                slot.retired_at = Some(at);
                retired += 1;
            }
        }
        debug!("Retired window {} and {} of its slots", window_id, retired);

        Ok(Some(window))
    }

    async fn delete_window(&self, window_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.windows.contains_key(&window_id) {
            return Ok(false);
        }

        let slot_ids: Vec<Uuid> = tables
            .slots
            .values()
            .filter(|slot| slot.window_id == window_id)
            .map(|slot| slot.id)
            .collect();
        if tables.bookings.values().any(|booking| slot_ids.contains(&booking.slot_id)) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "window {} has booked slots",
                window_id
            )));
        }

        tables.slots.retain(|_, slot| slot.window_id != window_id);
        tables.windows.remove(&window_id);
        Ok(true)
    }
}

#[async_trait]
impl SlotStore for InMemorySchedulingStore {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<CalculatedSlot>, StoreError> {
        Ok(self.tables.read().await.slots.get(&slot_id).cloned())
    }

    async fn list_window_slots(&self, window_id: Uuid) -> Result<Vec<CalculatedSlot>, StoreError> {
        let tables = self.tables.read().await;
        let mut slots: Vec<CalculatedSlot> = tables
            .slots
            .values()
            .filter(|slot| slot.window_id == window_id && slot.is_live())
            .cloned()
            .collect();
        slots.sort_by(|a, b| (a.service_id, a.start_time).cmp(&(b.service_id, b.start_time)));
        Ok(slots)
    }

    async fn insert_slot(&self, slot: &CalculatedSlot) -> Result<CalculatedSlot, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.windows.contains_key(&slot.window_id) {
            return Err(StoreError::ForeignKeyViolation(format!("window {}", slot.window_id)));
        }
        let duplicate = tables.slots.values().any(|existing| {
            existing.is_live()
                && existing.window_id == slot.window_id
                && existing.service_id == slot.service_id
                && existing.start_time == slot.start_time
        });
        if duplicate || tables.slots.contains_key(&slot.id) {
            return Err(StoreError::UniqueViolation(format!(
                "slot for service {} at {}",
                slot.service_id, slot.start_time
            )));
        }
        tables.slots.insert(slot.id, slot.clone());
        Ok(slot.clone())
    }

    async fn retire_slot(&self, slot_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.slots.get_mut(&slot_id) {
            Some(slot) if slot.is_live() && slot.status != SlotStatus::Booked => {
                slot.retired_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_slot(
        &self,
        slot_id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.slots.get_mut(&slot_id) {
            Some(slot) if slot.is_live() && slot.status == from => {
                slot.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_provider_slots(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
        range: TimeRange,
    ) -> Result<Vec<CalculatedSlot>, StoreError> {
        let tables = self.tables.read().await;
        let mut slots: Vec<CalculatedSlot> = tables
            .slots
            .values()
            .filter(|slot| {
                slot.provider_id == provider_id
                    && slot.is_live()
                    && slot.range().overlaps(&range)
                    && location_id.map_or(true, |location| slot.location_id == Some(location))
            })
            .cloned()
            .collect();
        slots.sort_by(|a, b| (a.start_time, a.service_id).cmp(&(b.start_time, b.service_id)));
        Ok(slots)
    }
}

#[async_trait]
impl BookingStore for InMemorySchedulingStore {
    async fn claim_slot(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let mut tables = self.tables.write().await;

        let window_retired = match tables.slots.get(&booking.slot_id) {
            Some(slot) => tables.window_retired(slot.window_id),
            None => return Err(StoreError::NotFound(format!("slot {}", booking.slot_id))),
        };
        if tables.has_active_booking(booking.slot_id) {
            return Err(StoreError::ConditionFailed(format!(
                "slot {} already has an active booking",
                booking.slot_id
            )));
        }

        let slot = tables
            .slots
            .get_mut(&booking.slot_id)
            .ok_or_else(|| StoreError::NotFound(format!("slot {}", booking.slot_id)))?;
        if !slot.is_claimable() || window_retired {
            return Err(StoreError::ConditionFailed(format!(
                "slot {} is {}",
                slot.id, slot.status
            )));
        }
        slot.status = SlotStatus::Booked;

        let stored = Booking {
            id: booking.id,
            slot_id: slot.id,
            provider_id: slot.provider_id,
            client: booking.client.clone(),
            status: booking.status,
            notes: booking.notes.clone(),
            slot_start_time: slot.start_time,
            slot_end_time: slot.end_time,
            created_at: booking.created_at,
            updated_at: booking.created_at,
            confirmed_at: (booking.status == BookingStatus::Confirmed).then_some(booking.created_at),
            cancelled_at: None,
            cancellation_reason: None,
        };
        tables.bookings.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn cancel_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, StoreError> {
        let mut tables = self.tables.write().await;

        let slot_id = match tables.bookings.get(&booking_id) {
            Some(booking) if booking.status.is_active() => booking.slot_id,
            Some(booking) => {
                return Err(StoreError::ConditionFailed(format!(
                    "booking {} is {}",
                    booking_id, booking.status
                )))
            }
            None => return Err(StoreError::NotFound(format!("booking {}", booking_id))),
        };

        let window_retired = tables
            .slots
            .get(&slot_id)
            .map(|slot| tables.window_retired(slot.window_id))
            .unwrap_or(true);

        let mut slot_released = false;
        if let Some(slot) = tables.slots.get_mut(&slot_id) {
            slot.status = SlotStatus::Available;
            if slot.is_live() && !window_retired {
                slot_released = true;
            } else if slot.retired_at.is_none() {
                slot.retired_at = Some(at);
            }
        }

        let booking = tables
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", booking_id)))?;
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(at);
        booking.cancellation_reason = reason;
        booking.updated_at = at;

        Ok(CancellationOutcome { booking: booking.clone(), slot_released })
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.read().await.bookings.get(&booking_id).cloned())
    }

    async fn active_booking_for_slot(&self, slot_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .find(|booking| booking.slot_id == slot_id && booking.status.is_active())
            .cloned())
    }

    async fn transition_booking(
        &self,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.bookings.get_mut(&booking_id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                booking.updated_at = at;
                if to == BookingStatus::Confirmed {
                    booking.confirmed_at = Some(at);
                }
                Ok(Some(booking.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl BusySnapshotStore for InMemorySchedulingStore {
    async fn save_busy_snapshot(&self, snapshot: &BusySnapshot) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .busy
            .insert((snapshot.provider_id, snapshot.location_id), snapshot.clone());
        Ok(())
    }

    async fn latest_busy_snapshot(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Option<BusySnapshot>, StoreError> {
        Ok(self.tables.read().await.busy.get(&(provider_id, location_id)).cloned())
    }

    async fn provider_busy_snapshots(&self, provider_id: Uuid) -> Result<Vec<BusySnapshot>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .busy
            .values()
            .filter(|snapshot| snapshot.provider_id == provider_id)
            .cloned()
            .collect())
    }
}
