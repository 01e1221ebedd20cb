#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use shared_database::store::{BookingStore, SlotStore, WindowStore};
use shared_models::scheduling::{
    Booking, BookingStatus, CalculatedSlot, NewBooking, SlotStatus, TimeRange,
};
use shared_utils::clock::Clock;
use shared_utils::test_utils::{guest_client, provider_window, service, TestContext};

/// Accepted window for the provider with one half-hour slot per entry in `starts`.
pub async fn slots_at(
    ctx: &TestContext,
    provider_id: Uuid,
    location_id: Option<Uuid>,
    starts: &[DateTime<Utc>],
) -> Vec<CalculatedSlot> {
    let (Some(first), Some(last)) = (starts.first(), starts.last()) else {
        return Vec::new();
    };
    let window = ctx
        .memory
        .insert_window(&provider_window(
            provider_id,
            *first,
            *last + Duration::minutes(30),
            vec![service(30, None)],
        ))
        .await
        .unwrap();
    let service = window.services[0].clone();

    let mut slots = Vec::new();
    for start in starts {
        let slot = CalculatedSlot {
            id: Uuid::new_v4(),
            window_id: window.id,
            provider_id,
            location_id,
            service_id: service.service_id,
            start_time: *start,
            end_time: *start + Duration::minutes(30),
            status: SlotStatus::Available,
            price: service.price,
            duration_minutes: service.duration_minutes,
            online: service.online,
            in_person: service.in_person,
            created_at: window.created_at,
            retired_at: None,
        };
        slots.push(ctx.memory.insert_slot(&slot).await.unwrap());
    }
    slots
}

pub async fn book(ctx: &TestContext, slot: &CalculatedSlot) -> Booking {
    ctx.memory
        .claim_slot(&NewBooking {
            id: Uuid::new_v4(),
            slot_id: slot.id,
            client: guest_client("Guest"),
            status: BookingStatus::Confirmed,
            notes: None,
            created_at: ctx.clock.now(),
        })
        .await
        .unwrap()
}

pub async fn status_of(ctx: &TestContext, slot: &CalculatedSlot) -> SlotStatus {
    ctx.memory.get_slot(slot.id).await.unwrap().unwrap().status
}

pub fn busy(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
    TimeRange { start, end }
}
