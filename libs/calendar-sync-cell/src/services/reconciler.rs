use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_database::cache::invalidate_provider;
use shared_database::{ReadModelCache, SchedulingStore};
use shared_models::auth::Actor;
use shared_models::error::StoreError;
use shared_models::scheduling::{BusySnapshot, CalculatedSlot, SlotStatus, TimeRange};
use shared_utils::clock::Clock;
use shared_utils::notify::{dispatch_in_background, NotificationDispatcher, Recipient, TemplateType};
use shared_utils::state::AppState;

use crate::models::{BusySnapshotRequest, ExternalConflict, ReconcileError, ReconciliationReport};

/// Minimum lookahead when a snapshot does not state its horizon.
const DEFAULT_HORIZON_DAYS: i64 = 366;
const RETRY_DELAY_MS: u64 = 20;

enum SlotChange {
    Applied,
    Superseded,
}

/// Applies external busy time to materialized slots.
///
/// Open slots under busy time become `BlockedExternal`, blocked slots no
/// longer under busy time open again, and booked slots are only reported.
/// A slot counts as busy when any stored snapshot covering it has a busy
/// interval over it (`BusySnapshot::busy_interval_for`), the same rule the
/// materializer applies to new slots.
pub struct ExternalCalendarReconciler {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn ReadModelCache>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    notification_timeout: StdDuration,
}

impl ExternalCalendarReconciler {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            notifier: state.notifier.clone(),
            clock: state.clock.clone(),
            max_attempts: state.config.reconcile_max_attempts.max(1),
            notification_timeout: state.config.notification_timeout(),
        }
    }

    pub async fn reconcile_external_busy(
        &self,
        provider_id: Uuid,
        actor: &Actor,
        request: BusySnapshotRequest,
    ) -> Result<ReconciliationReport, ReconcileError> {
        authorize(actor, provider_id)?;
        for interval in request.busy_intervals.iter().chain(request.horizon.iter()) {
            if interval.end <= interval.start {
                return Err(ReconcileError::InvalidInterval(format!(
                    "{} ends before it starts",
                    interval
                )));
            }
        }

        let now = self.clock.now();
        let previous = self.store.provider_busy_snapshots(provider_id).await?;
        let snapshot = BusySnapshot {
            provider_id,
            location_id: request.location_id,
            busy_intervals: request.busy_intervals,
            horizon: request.horizon,
            received_at: now,
        };
        self.store.save_busy_snapshot(&snapshot).await?;
        debug!(
            "Stored {} busy intervals for provider {} (location {:?})",
            snapshot.busy_intervals.len(),
            provider_id,
            snapshot.location_id
        );

        // Without a horizon the scope reaches every interval, old or new, that
        // can have blocked a slot, so far-off slots are blocked and released too.
        let scope = snapshot.horizon.unwrap_or_else(|| TimeRange {
            start: now,
            end: previous
                .iter()
                .chain(std::iter::once(&snapshot))
                .filter_map(BusySnapshot::latest_end)
                .fold(now + Duration::days(DEFAULT_HORIZON_DAYS), |end, latest| end.max(latest)),
        });
        let slots = self
            .store
            .list_provider_slots(provider_id, snapshot.location_id, scope)
            .await?;
        let snapshots = self.store.provider_busy_snapshots(provider_id).await?;

        let mut report = ReconciliationReport {
            provider_id,
            location_id: snapshot.location_id,
            ..ReconciliationReport::default()
        };

        for slot in slots.iter().filter(|slot| slot.end_time > now) {
            let busy = snapshots.iter().find_map(|s| s.busy_interval_for(slot));

            let target = match (slot.status, busy) {
                (SlotStatus::Available, Some(_)) => SlotStatus::BlockedExternal,
                (SlotStatus::BlockedExternal, None) => SlotStatus::Available,
                (SlotStatus::Booked, Some(interval)) => {
                    report.conflicts.push(self.conflict(slot, interval).await);
                    continue;
                }
                _ => {
                    report.slots_unchanged += 1;
                    continue;
                }
            };

            match self.apply(slot, target).await {
                Ok(SlotChange::Applied) if target == SlotStatus::BlockedExternal => report.slots_blocked += 1,
                Ok(SlotChange::Applied) => report.slots_released += 1,
                Ok(SlotChange::Superseded) => {
                    debug!("Slot {} changed while reconciling, left as is", slot.id);
                    report.slots_unchanged += 1;
                }
                Err(e) => {
                    error!("Could not move slot {} to {}: {}", slot.id, target, e);
                    report.errors.push(format!("slot {}: {}", slot.id, e));
                }
            }
        }

        invalidate_provider(self.cache.as_ref(), provider_id).await;
        for conflict in &report.conflicts {
            self.notify_conflict(provider_id, conflict);
        }

        info!(
            "Reconciled provider {}: {} blocked, {} released, {} conflicts, {} errors",
            provider_id,
            report.slots_blocked,
            report.slots_released,
            report.conflicts.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Stored snapshots of the provider, one per location scope.
    pub async fn busy_snapshots(
        &self,
        provider_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<BusySnapshot>, ReconcileError> {
        authorize(actor, provider_id)?;
        let mut snapshots = self.store.provider_busy_snapshots(provider_id).await?;
        snapshots.sort_by_key(|snapshot| snapshot.received_at);
        Ok(snapshots)
    }

    /// Conditional status write, retried on transient store failures only.
    async fn apply(&self, slot: &CalculatedSlot, target: SlotStatus) -> Result<SlotChange, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.transition_slot(slot.id, slot.status, target).await {
                Ok(true) => return Ok(SlotChange::Applied),
                Ok(false) => return Ok(SlotChange::Superseded),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "Slot {} update failed (attempt {}/{}): {}",
                        slot.id, attempt, self.max_attempts, e
                    );
                    tokio::time::sleep(StdDuration::from_millis(RETRY_DELAY_MS * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn conflict(&self, slot: &CalculatedSlot, busy_interval: TimeRange) -> ExternalConflict {
        let booking_id = match self.store.active_booking_for_slot(slot.id).await {
            Ok(booking) => booking.map(|b| b.id),
            Err(e) => {
                warn!("Could not load booking of conflicting slot {}: {}", slot.id, e);
                None
            }
        };
        warn!(
            "Booked slot {} overlaps external busy time {}",
            slot.id, busy_interval
        );
        ExternalConflict {
            slot_id: slot.id,
            booking_id,
            start_time: slot.start_time,
            end_time: slot.end_time,
            busy_interval,
        }
    }

    fn notify_conflict(&self, provider_id: Uuid, conflict: &ExternalConflict) {
        dispatch_in_background(
            self.notifier.clone(),
            Recipient::provider(provider_id),
            TemplateType::ExternalCalendarConflict,
            json!({
                "slot_id": conflict.slot_id,
                "booking_id": conflict.booking_id,
                "start_time": conflict.start_time,
                "end_time": conflict.end_time,
                "busy_start": conflict.busy_interval.start,
                "busy_end": conflict.busy_interval.end,
            }),
            self.notification_timeout,
        );
    }
}

/// The provider's own calendar sync, or an admin/service account.
fn authorize(actor: &Actor, provider_id: Uuid) -> Result<(), ReconcileError> {
    if actor.is_provider(provider_id) || actor.is_admin() {
        Ok(())
    } else {
        Err(ReconcileError::Unauthorized(
            "Only the provider or an administrator can sync calendar busy time".to_string(),
        ))
    }
}
