//! Supabase/PostgREST implementation of the scheduling store.
//!
//! Conditional status changes are PATCH requests filtered on the expected
//! status; an empty representation means the condition did not hold. The claim
//! and cancel operations call Postgres functions (see `migrations/`) so the slot
//! update and the booking write commit in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::StoreError;
use shared_models::scheduling::{
    AvailabilityWindow, Booking, BookingStatus, BusySnapshot, CalculatedSlot,
    CancellationOutcome, MaterializationRecord, MaterializationState, NewBooking, Proposer,
    SchedulingRule, ServiceConfig, SlotStatus, TimeRange, WindowOwner, WindowStatus,
    WindowTransition,
};

use crate::store::{BookingStore, BusySnapshotStore, SlotStore, WindowStore};
use crate::supabase::{SupabaseClient, SupabaseError};

const WINDOWS: &str = "/rest/v1/availability_windows";
const SLOTS: &str = "/rest/v1/calculated_slots";
const BOOKINGS: &str = "/rest/v1/bookings";
const BUSY: &str = "/rest/v1/external_busy_snapshots";

/// Map a Supabase client failure onto the storage error taxonomy.
pub fn store_error(err: anyhow::Error) -> StoreError {
    match err.downcast_ref::<SupabaseError>() {
        Some(api) => match api.code.as_deref() {
            Some("23505") => StoreError::UniqueViolation(api.message.clone()),
            Some("23503") => StoreError::ForeignKeyViolation(api.message.clone()),
            Some("P0001") => StoreError::ConditionFailed(api.message.clone()),
            Some("P0002") => StoreError::NotFound(api.message.clone()),
            _ if api.status == 404 => StoreError::NotFound(api.message.clone()),
            _ if api.status == 409 => StoreError::UniqueViolation(api.message.clone()),
            _ => StoreError::Backend(api.to_string()),
        },
        None => StoreError::Backend(err.to_string()),
    }
}

fn ts(value: DateTime<Utc>) -> String {
    urlencoding::encode(&value.to_rfc3339()).into_owned()
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::InvalidRecord(e.to_string()))
}

fn first<T: for<'de> Deserialize<'de>>(rows: Vec<Value>) -> Result<Option<T>, StoreError> {
    rows.into_iter().next().map(decode).transpose()
}

// ==============================================================================
// ROW MAPPINGS
// ==============================================================================

/// Flat storage shape of an availability window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub owner_kind: String,
    pub organization_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
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

impl From<&AvailabilityWindow> for WindowRow {
    fn from(window: &AvailabilityWindow) -> Self {
        Self {
            id: window.id,
            provider_id: window.provider_id,
            owner_kind: window.owner.kind().to_string(),
            organization_id: window.owner.organization_id(),
            location_id: window.owner.location_id(),
            start_time: window.start_time,
            end_time: window.end_time,
            rule: window.rule,
            services: window.services.clone(),
            status: window.status,
            proposer: window.proposer.clone(),
            accepted_by: window.accepted_by.clone(),
            accepted_at: window.accepted_at,
            rejected_by: window.rejected_by.clone(),
            rejected_at: window.rejected_at,
            rejection_reason: window.rejection_reason.clone(),
            materialization: window.materialization,
            materialization_error: window.materialization_error.clone(),
            last_materialized_at: window.last_materialized_at,
            retired_at: window.retired_at,
            created_at: window.created_at,
            updated_at: window.updated_at,
        }
    }
}

impl TryFrom<WindowRow> for AvailabilityWindow {
    type Error = StoreError;

    fn try_from(row: WindowRow) -> Result<Self, Self::Error> {
        let owner = WindowOwner::from_columns(&row.owner_kind, row.organization_id, row.location_id)
            .map_err(StoreError::InvalidRecord)?;

        Ok(Self {
            id: row.id,
            provider_id: row.provider_id,
            owner,
            start_time: row.start_time,
            end_time: row.end_time,
            rule: row.rule,
            services: row.services,
            status: row.status,
            proposer: row.proposer,
            accepted_by: row.accepted_by,
            accepted_at: row.accepted_at,
            rejected_by: row.rejected_by,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
            materialization: row.materialization,
            materialization_error: row.materialization_error,
            last_materialized_at: row.last_materialized_at,
            retired_at: row.retired_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_window(value: Value) -> Result<AvailabilityWindow, StoreError> {
    let row: WindowRow = decode(value)?;
    AvailabilityWindow::try_from(row)
}

fn decode_windows(rows: Vec<Value>) -> Result<Vec<AvailabilityWindow>, StoreError> {
    rows.into_iter().map(decode_window).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BusySnapshotRow {
    provider_id: Uuid,
    location_key: String,
    location_id: Option<Uuid>,
    busy_intervals: Vec<TimeRange>,
    horizon: Option<TimeRange>,
    received_at: DateTime<Utc>,
}

fn location_key(location_id: Option<Uuid>) -> String {
    location_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "all".to_string())
}

impl From<BusySnapshotRow> for BusySnapshot {
    fn from(row: BusySnapshotRow) -> Self {
        Self {
            provider_id: row.provider_id,
            location_id: row.location_id,
            busy_intervals: row.busy_intervals,
            horizon: row.horizon,
            received_at: row.received_at,
        }
    }
}

// ==============================================================================
// STORE
// ==============================================================================

pub struct PostgrestSchedulingStore {
    supabase: SupabaseClient,
}

impl PostgrestSchedulingStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub fn with_client(supabase: SupabaseClient) -> Self {
        Self { supabase }
    }

    async fn select(&self, path: &str) -> Result<Vec<Value>, StoreError> {
        self.supabase
            .request::<Vec<Value>>(Method::GET, path, None)
            .await
            .map_err(store_error)
    }

    async fn write(&self, method: Method, path: &str, body: Value) -> Result<Vec<Value>, StoreError> {
        self.supabase
            .request_with_headers::<Vec<Value>>(
                method,
                path,
                Some(body),
                Some(SupabaseClient::return_representation()),
            )
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl WindowStore for PostgrestSchedulingStore {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, StoreError> {
        debug!("Inserting availability window {}", window.id);
        let body = serde_json::to_value(WindowRow::from(window))
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        let rows = self.write(Method::POST, WINDOWS, body).await?;
        rows.into_iter()
            .next()
            .map(decode_window)
            .unwrap_or_else(|| Err(StoreError::Backend("Failed to create availability window".to_string())))
    }

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError> {
        let rows = self.select(&format!("{}?id=eq.{}", WINDOWS, window_id)).await?;
        rows.into_iter().next().map(decode_window).transpose()
    }

    async fn list_provider_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let path = format!("{}?provider_id=eq.{}&order=start_time.asc", WINDOWS, provider_id);
        decode_windows(self.select(&path).await?)
    }

    async fn find_overlapping_windows(
        &self,
        provider_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let path = format!(
            "{}?provider_id=eq.{}&status=neq.rejected&retired_at=is.null&start_time=lt.{}&end_time=gt.{}",
            WINDOWS,
            provider_id,
            ts(range.end),
            ts(range.start)
        );
        decode_windows(self.select(&path).await?)
    }

    async fn transition_window(
        &self,
        window_id: Uuid,
        transition: &WindowTransition,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        let body = match transition {
            WindowTransition::Accept { by, at } => json!({
                "status": WindowStatus::Accepted,
                "accepted_by": by,
                "accepted_at": at,
                "materialization": MaterializationState::Pending,
                "updated_at": at,
            }),
            WindowTransition::Reject { by, at, reason } => json!({
                "status": WindowStatus::Rejected,
                "rejected_by": by,
                "rejected_at": at,
                "rejection_reason": reason,
                "updated_at": at,
            }),
        };
        let path = format!("{}?id=eq.{}&status=eq.pending&retired_at=is.null", WINDOWS, window_id);
        let rows = self.write(Method::PATCH, &path, body).await?;
        rows.into_iter().next().map(decode_window).transpose()
    }

    async fn update_window_services(
        &self,
        window_id: Uuid,
        services: &[ServiceConfig],
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        let path = format!("{}?id=eq.{}&status=neq.rejected&retired_at=is.null", WINDOWS, window_id);
        let body = json!({ "services": services, "updated_at": at });
        let rows = self.write(Method::PATCH, &path, body).await?;
        rows.into_iter().next().map(decode_window).transpose()
    }

    async fn record_materialization(
        &self,
        window_id: Uuid,
        record: &MaterializationRecord,
    ) -> Result<(), StoreError> {
        let path = format!("{}?id=eq.{}", WINDOWS, window_id);
        let body = json!({
            "materialization": record.state,
            "materialization_error": record.error,
            "last_materialized_at": record.at,
            "updated_at": record.at,
        });
        let rows = self.write(Method::PATCH, &path, body).await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(format!("window {}", window_id)));
        }
        Ok(())
    }

    async fn list_unmaterialized_windows(&self) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let path = format!(
            "{}?status=eq.accepted&retired_at=is.null&materialization=in.(pending,partial,failed)&order=start_time.asc",
            WINDOWS
        );
        decode_windows(self.select(&path).await?)
    }

    async fn retire_window(
        &self,
        window_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        let body = json!({ "p_window_id": window_id, "p_retired_at": at });
        let rows = self.write(Method::POST, "/rest/v1/rpc/retire_window", body).await?;
        rows.into_iter().next().map(decode_window).transpose()
    }

    async fn delete_window(&self, window_id: Uuid) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}", WINDOWS, window_id);
        let rows: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                &path,
                None,
                Some(SupabaseClient::return_representation()),
            )
            .await
            .map_err(store_error)?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl SlotStore for PostgrestSchedulingStore {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<CalculatedSlot>, StoreError> {
        first(self.select(&format!("{}?id=eq.{}", SLOTS, slot_id)).await?)
    }

    async fn list_window_slots(&self, window_id: Uuid) -> Result<Vec<CalculatedSlot>, StoreError> {
        let path = format!(
            "{}?window_id=eq.{}&retired_at=is.null&order=service_id.asc,start_time.asc",
            SLOTS, window_id
        );
        self.select(&path).await?.into_iter().map(decode).collect()
    }

    async fn insert_slot(&self, slot: &CalculatedSlot) -> Result<CalculatedSlot, StoreError> {
        let body = serde_json::to_value(slot).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        let rows = self.write(Method::POST, SLOTS, body).await?;
        first(rows)?.ok_or_else(|| StoreError::Backend("Failed to create slot".to_string()))
    }

    async fn retire_slot(&self, slot_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let path = format!("{}?id=eq.{}&status=neq.booked&retired_at=is.null", SLOTS, slot_id);
        let rows = self.write(Method::PATCH, &path, json!({ "retired_at": at })).await?;
        Ok(!rows.is_empty())
    }

    async fn transition_slot(
        &self,
        slot_id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
    ) -> Result<bool, StoreError> {
        let path = format!(
            "{}?id=eq.{}&status=eq.{}&retired_at=is.null",
            SLOTS,
            slot_id,
            from.as_str()
        );
        let rows = self.write(Method::PATCH, &path, json!({ "status": to })).await?;
        Ok(!rows.is_empty())
    }

    async fn list_provider_slots(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
        range: TimeRange,
    ) -> Result<Vec<CalculatedSlot>, StoreError> {
        let mut path = format!(
            "{}?provider_id=eq.{}&retired_at=is.null&start_time=lt.{}&end_time=gt.{}",
            SLOTS,
            provider_id,
            ts(range.end),
            ts(range.start)
        );
        if let Some(location_id) = location_id {
            path.push_str(&format!("&location_id=eq.{}", location_id));
        }
        path.push_str("&order=start_time.asc,service_id.asc");
        self.select(&path).await?.into_iter().map(decode).collect()
    }
}

#[async_trait]
impl BookingStore for PostgrestSchedulingStore {
    async fn claim_slot(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        let body = json!({
            "p_booking_id": booking.id,
            "p_slot_id": booking.slot_id,
            "p_client": booking.client,
            "p_status": booking.status,
            "p_notes": booking.notes,
            "p_created_at": booking.created_at,
        });

        let rows = match self.write(Method::POST, "/rest/v1/rpc/claim_slot", body).await {
            Ok(rows) => rows,
            // The partial unique index on active bookings backs up the status check.
            Err(StoreError::UniqueViolation(message)) => {
                return Err(StoreError::ConditionFailed(message));
            }
            Err(e) => return Err(e),
        };

        match first::<Booking>(rows)? {
            Some(stored) => Ok(stored),
            None => Err(StoreError::ConditionFailed(format!(
                "slot {} is not available",
                booking.slot_id
            ))),
        }
    }

    async fn cancel_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, StoreError> {
        let body = json!({
            "p_booking_id": booking_id,
            "p_cancelled_at": at,
            "p_reason": reason,
        });
        let outcome: Value = self
            .supabase
            .request(Method::POST, "/rest/v1/rpc/cancel_booking", Some(body))
            .await
            .map_err(store_error)?;

        if outcome.is_null() {
            warn!("cancel_booking returned no outcome for booking {}", booking_id);
            return Err(StoreError::NotFound(format!("booking {}", booking_id)));
        }
        decode(outcome)
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        first(self.select(&format!("{}?id=eq.{}", BOOKINGS, booking_id)).await?)
    }

    async fn active_booking_for_slot(&self, slot_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let path = format!(
            "{}?slot_id=eq.{}&status=in.(pending,confirmed)&limit=1",
            BOOKINGS, slot_id
        );
        first(self.select(&path).await?)
    }

    async fn transition_booking(
        &self,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let path = format!("{}?id=eq.{}&status=eq.{}", BOOKINGS, booking_id, from.as_str());
        let mut body = json!({ "status": to, "updated_at": at });
        if to == BookingStatus::Confirmed {
            body["confirmed_at"] = json!(at);
        }
        first(self.write(Method::PATCH, &path, body).await?)
    }
}

#[async_trait]
impl BusySnapshotStore for PostgrestSchedulingStore {
    async fn save_busy_snapshot(&self, snapshot: &BusySnapshot) -> Result<(), StoreError> {
        let row = BusySnapshotRow {
            provider_id: snapshot.provider_id,
            location_key: location_key(snapshot.location_id),
            location_id: snapshot.location_id,
            busy_intervals: snapshot.busy_intervals.clone(),
            horizon: snapshot.horizon,
            received_at: snapshot.received_at,
        };
        let body = serde_json::to_value(row).map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        let path = format!("{}?on_conflict=provider_id,location_key", BUSY);
        let _: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                &path,
                Some(body),
                Some(SupabaseClient::upsert_representation()),
            )
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn latest_busy_snapshot(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Option<BusySnapshot>, StoreError> {
        let path = format!(
            "{}?provider_id=eq.{}&location_key=eq.{}",
            BUSY,
            provider_id,
            location_key(location_id)
        );
        let row: Option<BusySnapshotRow> = first(self.select(&path).await?)?;
        Ok(row.map(BusySnapshot::from))
    }

    async fn provider_busy_snapshots(&self, provider_id: Uuid) -> Result<Vec<BusySnapshot>, StoreError> {
        let path = format!("{}?provider_id=eq.{}", BUSY, provider_id);
        self.select(&path)
            .await?
            .into_iter()
            .map(|value| decode::<BusySnapshotRow>(value).map(BusySnapshot::from))
            .collect()
    }
}
