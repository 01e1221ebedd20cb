use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, DurationRound};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::cache::{begin_fill, complete_fill, open_slot_counts_key, open_slots_key};
use shared_database::{ReadModelCache, SchedulingStore};
use shared_models::scheduling::{CalculatedSlot, SlotStatus, TimeRange};
use shared_utils::clock::Clock;
use shared_utils::state::AppState;

use crate::models::{AvailabilityError, OpenSlotCount, OpenSlotsQuery};

const DEFAULT_LOOKAHEAD_DAYS: i64 = 14;
const COUNTS_LOOKAHEAD_DAYS: i64 = 90;
const MAX_QUERY_DAYS: i64 = 92;

/// Public read model of bookable slots, cached per provider.
pub struct OpenSlotService {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn ReadModelCache>,
    clock: Arc<dyn Clock>,
    ttl: StdDuration,
}

impl OpenSlotService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            clock: state.clock.clone(),
            ttl: state.config.open_slots_cache_ttl(),
        }
    }

    /// Available, not yet started slots in `[from, to)`.
    pub async fn open_slots(
        &self,
        provider_id: Uuid,
        query: OpenSlotsQuery,
    ) -> Result<Vec<CalculatedSlot>, AvailabilityError> {
        let now = self.clock.now();
        // Minute granularity keeps default queries on a shared cache key.
        let from = query
            .from
            .unwrap_or(now)
            .duration_trunc(Duration::minutes(1))
            .unwrap_or(now);
        let to = query.to.unwrap_or(from + Duration::days(DEFAULT_LOOKAHEAD_DAYS));
        let range = TimeRange::new(from, to).map_err(AvailabilityError::InvalidWindow)?;
        if range.duration() > Duration::days(MAX_QUERY_DAYS) {
            return Err(AvailabilityError::InvalidWindow(format!(
                "Query range must not exceed {} days",
                MAX_QUERY_DAYS
            )));
        }

        let key = open_slots_key(
            provider_id,
            &from.to_rfc3339(),
            &format!(
                "{}:{}:{}",
                to.to_rfc3339(),
                option_key(query.location_id),
                option_key(query.service_id)
            ),
        );

        let slots = match self.cached::<Vec<CalculatedSlot>>(&key).await {
            Some(slots) => slots,
            None => {
                let fill = begin_fill(self.cache.as_ref(), &key, self.ttl).await;
                let slots: Vec<CalculatedSlot> = self
                    .store
                    .list_provider_slots(provider_id, query.location_id, range)
                    .await?
                    .into_iter()
                    .filter(|slot| slot.status == SlotStatus::Available)
                    .filter(|slot| query.service_id.map_or(true, |id| slot.service_id == id))
                    .collect();
                self.store_in_cache(&key, &fill, &slots).await;
                slots
            }
        };

        Ok(slots.into_iter().filter(|slot| slot.start_time > now).collect())
    }

    /// Per-service count of upcoming open slots.
    pub async fn open_slot_counts(&self, provider_id: Uuid) -> Result<Vec<OpenSlotCount>, AvailabilityError> {
        let key = open_slot_counts_key(provider_id);
        if let Some(counts) = self.cached::<Vec<OpenSlotCount>>(&key).await {
            return Ok(counts);
        }

        let fill = begin_fill(self.cache.as_ref(), &key, self.ttl).await;
        let now = self.clock.now();
        let range = TimeRange {
            start: now,
            end: now + Duration::days(COUNTS_LOOKAHEAD_DAYS),
        };
        let slots = self.store.list_provider_slots(provider_id, None, range).await?;

        let mut counts: BTreeMap<Uuid, OpenSlotCount> = BTreeMap::new();
        for slot in slots
            .iter()
            .filter(|slot| slot.status == SlotStatus::Available && slot.start_time > now)
        {
            let entry = counts.entry(slot.service_id).or_insert(OpenSlotCount {
                service_id: slot.service_id,
                open_slots: 0,
                next_start_time: None,
            });
            entry.open_slots += 1;
            entry.next_start_time = Some(match entry.next_start_time {
                Some(current) => current.min(slot.start_time),
                None => slot.start_time,
            });
        }

        let counts: Vec<OpenSlotCount> = counts.into_values().collect();
        self.store_in_cache(&key, &fill, &counts).await;
        Ok(counts)
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.cache.get(key).await?;
        match serde_json::from_value(value) {
            Ok(parsed) => {
                debug!("Read model cache hit: {}", key);
                Some(parsed)
            }
            Err(e) => {
                warn!("Discarding unreadable cache entry {}: {}", key, e);
                self.cache.invalidate(key).await;
                None
            }
        }
    }

    /// Writes are dropped when an invalidation landed since the fill began.
    async fn store_in_cache<T: serde::Serialize>(&self, key: &str, fill: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                complete_fill(self.cache.as_ref(), key, fill, value, self.ttl).await;
            }
            Err(e) => warn!("Could not serialize read model {}: {}", key, e),
        }
    }
}

fn option_key(id: Option<Uuid>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "all".to_string())
}
