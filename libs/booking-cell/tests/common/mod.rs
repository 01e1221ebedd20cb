#![allow(dead_code)]

use chrono::{DateTime, Utc};
use uuid::Uuid;

use booking_cell::models::{ClaimSlotRequest, GuestDetails};
use shared_database::store::{SlotStore, WindowStore};
use shared_models::scheduling::{AvailabilityWindow, CalculatedSlot, SlotStatus, WindowOwner};
use shared_utils::test_utils::{provider_window, service, TestContext};

/// Inserts an accepted window holding exactly one available slot.
pub async fn open_slot(
    ctx: &TestContext,
    provider_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CalculatedSlot {
    let window = provider_window(provider_id, start, end, vec![service(30, None)]);
    insert_slot(ctx, window, start, end).await
}

/// Same as `open_slot`, for a window owned by an organization.
pub async fn organization_slot(
    ctx: &TestContext,
    provider_id: Uuid,
    organization_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CalculatedSlot {
    let window = AvailabilityWindow {
        owner: WindowOwner::Organization { organization_id },
        ..provider_window(provider_id, start, end, vec![service(30, None)])
    };
    insert_slot(ctx, window, start, end).await
}

async fn insert_slot(
    ctx: &TestContext,
    window: AvailabilityWindow,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> CalculatedSlot {
    let window = ctx.memory.insert_window(&window).await.unwrap();
    let service = window.services[0].clone();
    let slot = CalculatedSlot {
        id: Uuid::new_v4(),
        window_id: window.id,
        provider_id: window.provider_id,
        location_id: None,
        service_id: service.service_id,
        start_time: start,
        end_time: end,
        status: SlotStatus::Available,
        price: service.price,
        duration_minutes: service.duration_minutes,
        online: service.online,
        in_person: service.in_person,
        created_at: window.created_at,
        retired_at: None,
    };
    ctx.memory.insert_slot(&slot).await.unwrap()
}

pub fn guest_request(name: &str) -> ClaimSlotRequest {
    ClaimSlotRequest {
        guest: Some(GuestDetails {
            name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            phone: None,
        }),
        ..ClaimSlotRequest::default()
    }
}
