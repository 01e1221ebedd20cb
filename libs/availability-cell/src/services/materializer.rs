use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_database::cache::invalidate_provider;
use shared_database::{ReadModelCache, SchedulingStore};
use shared_models::error::StoreError;
use shared_models::scheduling::{
    AvailabilityWindow, BusySnapshot, CalculatedSlot, MaterializationRecord, MaterializationState,
    ServiceConfig, SlotStatus, WindowStatus,
};
use shared_utils::clock::Clock;
use shared_utils::state::AppState;

use crate::models::{AvailabilityError, CandidateSlot, MaterializationReport};
use crate::services::rules;

type SlotKey = (Uuid, DateTime<Utc>, DateTime<Utc>);

fn candidate_key(candidate: &CandidateSlot) -> SlotKey {
    (candidate.service_id, candidate.start_time, candidate.end_time)
}

fn slot_key(slot: &CalculatedSlot) -> SlotKey {
    (slot.service_id, slot.start_time, slot.end_time)
}

#[derive(Debug, Default)]
struct AttemptOutcome {
    created: usize,
    retired: usize,
    unchanged: usize,
    skipped: Vec<CandidateSlot>,
    errors: Vec<String>,
}

/// Reconciles a window's live slots with the evaluator's candidates.
pub struct SlotMaterializer {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn ReadModelCache>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl SlotMaterializer {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            clock: state.clock.clone(),
            max_attempts: state.config.materialization_max_attempts.max(1),
        }
    }

    pub async fn materialize(&self, window_id: Uuid) -> Result<MaterializationReport, AvailabilityError> {
        let window = self
            .store
            .get_window(window_id)
            .await?
            .ok_or(AvailabilityError::WindowNotFound)?;
        self.materialize_window(&window).await
    }

    /// Runs the diff with bounded retries and records the outcome on the
    /// window. Per-slot failures end up in the report, not in the error.
    pub async fn materialize_window(
        &self,
        window: &AvailabilityWindow,
    ) -> Result<MaterializationReport, AvailabilityError> {
        if window.is_retired() {
            return Err(AvailabilityError::WindowRetired);
        }
        if window.status != WindowStatus::Accepted {
            return Err(AvailabilityError::NotAccepted(window.status));
        }

        let candidates = rules::generate_candidates(&window.range(), &window.rule, &window.services)?;
        debug!(
            "Materializing window {} with {} candidate slots",
            window.id,
            candidates.len()
        );

        let mut report = MaterializationReport {
            window_id: window.id,
            state: MaterializationState::Pending,
            slots_created: 0,
            slots_retired: 0,
            slots_unchanged: 0,
            skipped_conflicts: Vec::new(),
            errors: Vec::new(),
            attempts: 0,
        };

        while report.attempts < self.max_attempts {
            report.attempts += 1;
            let outcome = match self.attempt(window, &candidates).await {
                Ok(outcome) => outcome,
                Err(e) => AttemptOutcome {
                    errors: vec![e.to_string()],
                    ..AttemptOutcome::default()
                },
            };

            report.slots_created += outcome.created;
            report.slots_retired += outcome.retired;
            report.slots_unchanged = outcome.unchanged;
            report.skipped_conflicts = outcome.skipped;
            report.errors = outcome.errors;

            if report.errors.is_empty() {
                break;
            }
            warn!(
                "Materialization attempt {}/{} for window {} failed with {} errors",
                report.attempts,
                self.max_attempts,
                window.id,
                report.errors.len()
            );
        }

        report.state = if report.errors.is_empty() {
            MaterializationState::Complete
        } else if report.slots_created > 0 || report.slots_unchanged > 0 {
            MaterializationState::Partial
        } else {
            MaterializationState::Failed
        };

        let record = MaterializationRecord {
            state: report.state,
            error: (!report.errors.is_empty()).then(|| report.errors.join("; ")),
            at: self.clock.now(),
        };
        if let Err(e) = self.store.record_materialization(window.id, &record).await {
            error!("Failed to record materialization for window {}: {}", window.id, e);
        }

        invalidate_provider(self.cache.as_ref(), window.provider_id).await;

        info!(
            "Window {} materialized: {:?} ({} created, {} retired, {} unchanged, {} skipped)",
            window.id,
            report.state,
            report.slots_created,
            report.slots_retired,
            report.slots_unchanged,
            report.skipped_conflicts.len()
        );

        Ok(report)
    }

    /// One diff pass. Re-reading the live slots each time makes a retry after a
    /// concurrent run converge instead of duplicating work.
    async fn attempt(
        &self,
        window: &AvailabilityWindow,
        candidates: &[CandidateSlot],
    ) -> Result<AttemptOutcome, StoreError> {
        let existing = self.store.list_window_slots(window.id).await?;
        let busy = self.store.provider_busy_snapshots(window.provider_id).await?;
        let now = self.clock.now();

        let wanted: HashSet<SlotKey> = candidates.iter().map(candidate_key).collect();
        let mut outcome = AttemptOutcome::default();
        let mut present: HashSet<SlotKey> = HashSet::new();
        let mut frozen: Vec<&CalculatedSlot> = Vec::new();

        for slot in &existing {
            let key = slot_key(slot);
            if wanted.contains(&key) {
                present.insert(key);
                outcome.unchanged += 1;
                continue;
            }
            if slot.status == SlotStatus::Booked {
                frozen.push(slot);
                continue;
            }
            match self.store.retire_slot(slot.id, now).await {
                Ok(true) => outcome.retired += 1,
                // Claimed between the read and the retire.
                Ok(false) => frozen.push(slot),
                Err(e) => outcome.errors.push(format!("retire slot {}: {}", slot.id, e)),
            }
        }

        let services: HashMap<Uuid, &ServiceConfig> = window
            .services
            .iter()
            .map(|service| (service.service_id, service))
            .collect();

        for candidate in candidates {
            if present.contains(&candidate_key(candidate)) {
                continue;
            }

            let blocked_by_booking = frozen.iter().any(|slot| {
                slot.service_id == candidate.service_id
                    && slot.start_time < candidate.end_time
                    && candidate.start_time < slot.end_time
            });
            if blocked_by_booking {
                outcome.skipped.push(*candidate);
                continue;
            }

            let Some(service) = services.get(&candidate.service_id) else {
                continue;
            };
            let slot = build_slot(window, service, candidate, &busy, now);
            match self.store.insert_slot(&slot).await {
                Ok(_) => outcome.created += 1,
                Err(e) => {
                    debug!("Insert of slot {} for window {} failed: {}", slot.start_time, window.id, e);
                    outcome.errors.push(format!(
                        "insert slot {} at {}: {}",
                        candidate.service_id, candidate.start_time, e
                    ));
                }
            }
        }

        Ok(outcome)
    }
}

fn build_slot(
    window: &AvailabilityWindow,
    service: &ServiceConfig,
    candidate: &CandidateSlot,
    busy: &[BusySnapshot],
    now: DateTime<Utc>,
) -> CalculatedSlot {
    let mut slot = CalculatedSlot {
        id: Uuid::new_v4(),
        window_id: window.id,
        provider_id: window.provider_id,
        location_id: service.location_id.or(window.location_id()),
        service_id: service.service_id,
        start_time: candidate.start_time,
        end_time: candidate.end_time,
        status: SlotStatus::Available,
        price: service.price,
        duration_minutes: service.duration_minutes,
        online: service.online,
        in_person: service.in_person,
        created_at: now,
        retired_at: None,
    };

    if busy.iter().any(|snapshot| snapshot.busy_interval_for(&slot).is_some()) {
        slot.status = SlotStatus::BlockedExternal;
    }
    slot
}
