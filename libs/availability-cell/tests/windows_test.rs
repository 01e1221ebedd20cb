use assert_matches::assert_matches;
use chrono::{DateTime, Utc};
use tokio_test::assert_ok;
use uuid::Uuid;

use availability_cell::models::{AvailabilityError, OpenSlotsQuery, ProposeWindowRequest};
use availability_cell::services::{OpenSlotService, WindowService};
use shared_database::store::{BookingStore, SlotStore, WindowStore};
use shared_models::scheduling::{
    BookingStatus, MaterializationState, NewBooking, SchedulingRule, ServiceConfig, SlotStatus,
    WindowOwner, WindowStatus,
};
use shared_utils::notify::TemplateType;
use shared_utils::test_utils::{at, guest_client, service, TestContext, TestUser};

fn request(
    provider_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    services: Vec<ServiceConfig>,
) -> ProposeWindowRequest {
    ProposeWindowRequest {
        provider_id,
        owner: None,
        start_time: start,
        end_time: end,
        rule: SchedulingRule::default(),
        services,
    }
}

fn booking_for(slot_id: Uuid) -> NewBooking {
    NewBooking {
        id: Uuid::new_v4(),
        slot_id,
        client: guest_client("A"),
        status: BookingStatus::Pending,
        notes: None,
        created_at: at(7, 0),
    }
}

#[tokio::test]
async fn test_provider_window_is_accepted_and_materialized() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();

    let outcome = WindowService::new(&ctx.state)
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();

    assert_eq!(outcome.window.status, WindowStatus::Accepted);
    assert_eq!(outcome.window.owner, WindowOwner::Provider);
    assert_eq!(outcome.window.materialization, MaterializationState::Complete);
    assert_eq!(ctx.memory.list_window_slots(outcome.window.id).await.unwrap().len(), 2);
    assert!(ctx.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_organization_proposal_waits_for_provider() {
    let ctx = TestContext::new(at(6, 0));
    let provider_id = Uuid::new_v4();
    let org_id = Uuid::new_v4();
    let manager = TestUser::org_admin("manager@clinic.example", org_id).actor();

    let outcome = WindowService::new(&ctx.state)
        .propose(&manager, request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();

    assert_eq!(outcome.window.status, WindowStatus::Pending);
    assert_eq!(outcome.window.owner, WindowOwner::Organization { organization_id: org_id });
    assert_eq!(outcome.window.materialization, MaterializationState::NotRequired);
    assert!(outcome.materialization.is_none());
    assert_eq!(ctx.memory.slot_row_count(outcome.window.id).await, 0);

    let sent = ctx.notifier.wait_for(1).await;
    assert_eq!(sent[0].template, TemplateType::AvailabilityProposed);
    assert_eq!(sent[0].recipient.user_id, Some(provider_id.to_string()));
}

#[tokio::test]
async fn test_provider_can_publish_location_window() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let location_id = Uuid::new_v4();

    let mut proposal = request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]);
    proposal.owner = Some(WindowOwner::Location { location_id, organization_id: None });
    let outcome = WindowService::new(&ctx.state)
        .propose(&provider.actor(), proposal)
        .await
        .unwrap();

    assert_eq!(outcome.window.status, WindowStatus::Accepted);
    assert_eq!(outcome.window.location_id(), Some(location_id));
    let slots = ctx.memory.list_window_slots(outcome.window.id).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert!(slots.iter().all(|slot| slot.location_id == Some(location_id)));
}

#[tokio::test]
async fn test_provider_cannot_claim_organization_ownership() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let org_id = Uuid::new_v4();
    let windows = WindowService::new(&ctx.state);

    for owner in [
        WindowOwner::Organization { organization_id: org_id },
        WindowOwner::Location { location_id: Uuid::new_v4(), organization_id: Some(org_id) },
    ] {
        let mut proposal = request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]);
        proposal.owner = Some(owner);
        assert_matches!(
            windows.propose(&provider.actor(), proposal).await,
            Err(AvailabilityError::Unauthorized(_))
        );
    }
    assert!(ctx
        .memory
        .list_provider_windows(provider_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_overlapping_window_is_refused() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let windows = WindowService::new(&ctx.state);

    let first = windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();

    let overlapping = windows
        .propose(&provider.actor(), request(provider_id, at(9, 30), at(10, 30), vec![service(30, None)]))
        .await;
    assert_matches!(overlapping, Err(AvailabilityError::OverlappingWindow(id)) if id == first.window.id);

    let adjacent = windows
        .propose(&provider.actor(), request(provider_id, at(10, 0), at(11, 0), vec![service(30, None)]))
        .await;
    assert_ok!(adjacent);
}

#[tokio::test]
async fn test_invalid_proposals_are_refused() {
    let ctx = TestContext::new(at(12, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let windows = WindowService::new(&ctx.state);

    let past = windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await;
    assert_matches!(past, Err(AvailabilityError::InvalidWindow(_)));

    let no_services = windows
        .propose(&provider.actor(), request(provider_id, at(13, 0), at(14, 0), vec![]))
        .await;
    assert_matches!(no_services, Err(AvailabilityError::InvalidService(_)));

    let staff = TestUser::org_staff("staff@clinic.example", Uuid::new_v4()).actor();
    let by_staff = windows
        .propose(&staff, request(provider_id, at(13, 0), at(14, 0), vec![service(30, None)]))
        .await;
    assert_matches!(by_staff, Err(AvailabilityError::Unauthorized(_)));

    let other_provider = TestUser::provider("other@clinic.example").actor();
    let for_someone_else = windows
        .propose(&other_provider, request(provider_id, at(13, 0), at(14, 0), vec![service(30, None)]))
        .await;
    assert_matches!(for_someone_else, Err(AvailabilityError::Unauthorized(_)));
}

#[tokio::test]
async fn test_retire_keeps_booked_slot_closed() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let windows = WindowService::new(&ctx.state);

    let outcome = windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();
    let slots = ctx.memory.list_window_slots(outcome.window.id).await.unwrap();
    let booking = ctx.memory.claim_slot(&booking_for(slots[0].id)).await.unwrap();

    let retired = windows.retire_window(outcome.window.id, &provider.actor()).await.unwrap();
    assert!(retired.is_retired());

    let live = ctx.memory.list_window_slots(outcome.window.id).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].status, SlotStatus::Booked);

    let cancelled = ctx.memory.cancel_booking(booking.id, at(8, 0), None).await.unwrap();
    assert!(!cancelled.slot_released);
    assert!(ctx.memory.list_window_slots(outcome.window.id).await.unwrap().is_empty());

    assert_matches!(
        windows.retire_window(outcome.window.id, &provider.actor()).await,
        Err(AvailabilityError::WindowRetired)
    );
}

#[tokio::test]
async fn test_delete_is_refused_once_booked() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let windows = WindowService::new(&ctx.state);

    let booked = windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();
    let slots = ctx.memory.list_window_slots(booked.window.id).await.unwrap();
    ctx.memory.claim_slot(&booking_for(slots[0].id)).await.unwrap();

    assert_matches!(
        windows.delete_window(booked.window.id, &provider.actor()).await,
        Err(AvailabilityError::WindowHasBookings)
    );

    let unbooked = windows
        .propose(&provider.actor(), request(provider_id, at(11, 0), at(12, 0), vec![service(30, None)]))
        .await
        .unwrap();
    windows.delete_window(unbooked.window.id, &provider.actor()).await.unwrap();
    assert!(ctx.memory.get_window(unbooked.window.id).await.unwrap().is_none());
    assert_eq!(ctx.memory.slot_row_count(unbooked.window.id).await, 0);
}

#[tokio::test]
async fn test_reconfigure_rematerializes_accepted_window() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let windows = WindowService::new(&ctx.state);

    let outcome = windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();

    let reconfigured = windows
        .reconfigure_services(outcome.window.id, &provider.actor(), vec![service(20, None)])
        .await
        .unwrap();

    let report = reconfigured.materialization.unwrap();
    assert_eq!(report.slots_created, 3);
    assert_eq!(report.slots_retired, 2);
    assert_eq!(ctx.memory.list_window_slots(outcome.window.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_org_member_sees_only_own_windows() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let org_id = Uuid::new_v4();
    let windows = WindowService::new(&ctx.state);

    windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();
    let manager = TestUser::org_admin("manager@clinic.example", org_id).actor();
    windows
        .propose(&manager, request(provider_id, at(11, 0), at(12, 0), vec![service(30, None)]))
        .await
        .unwrap();

    let staff = TestUser::org_staff("staff@clinic.example", org_id).actor();
    let visible = windows.list_provider_windows(provider_id, &staff).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].organization_id(), Some(org_id));

    let all = windows.list_provider_windows(provider_id, &provider.actor()).await.unwrap();
    assert_eq!(all.len(), 2);

    let client = TestUser::client("client@example.com").actor();
    assert_matches!(
        windows.list_provider_windows(provider_id, &client).await,
        Err(AvailabilityError::Unauthorized(_))
    );
}

#[tokio::test]
async fn test_open_slots_are_cached_until_invalidated() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let windows = WindowService::new(&ctx.state);
    let open_slots = OpenSlotService::new(&ctx.state);

    let outcome = windows
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]))
        .await
        .unwrap();

    let listed = open_slots.open_slots(provider_id, OpenSlotsQuery::default()).await.unwrap();
    assert_eq!(listed.len(), 2);
    // The listing plus its fill marker.
    assert_eq!(ctx.cache.len().await, 2);

    windows.retire_window(outcome.window.id, &provider.actor()).await.unwrap();
    assert_eq!(ctx.cache.len().await, 0);

    let listed = open_slots.open_slots(provider_id, OpenSlotsQuery::default()).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_open_slots_hide_started_and_booked_slots() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();

    let outcome = WindowService::new(&ctx.state)
        .propose(&provider.actor(), request(provider_id, at(9, 0), at(11, 0), vec![service(30, None)]))
        .await
        .unwrap();
    let slots = ctx.memory.list_window_slots(outcome.window.id).await.unwrap();
    ctx.memory.claim_slot(&booking_for(slots[3].id)).await.unwrap();

    ctx.clock.set(at(9, 15));
    let listed = OpenSlotService::new(&ctx.state)
        .open_slots(provider_id, OpenSlotsQuery::default())
        .await
        .unwrap();

    let starts: Vec<_> = listed.iter().map(|slot| slot.start_time).collect();
    assert_eq!(starts, vec![at(9, 30), at(10, 0)]);
}

#[tokio::test]
async fn test_open_slot_counts_per_service() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let short = service(30, None);
    let long = service(60, None);

    WindowService::new(&ctx.state)
        .propose(
            &provider.actor(),
            request(provider_id, at(9, 0), at(11, 0), vec![short.clone(), long.clone()]),
        )
        .await
        .unwrap();

    let counts = OpenSlotService::new(&ctx.state).open_slot_counts(provider_id).await.unwrap();
    assert_eq!(counts.len(), 2);

    let short_count = counts.iter().find(|c| c.service_id == short.service_id).unwrap();
    assert_eq!(short_count.open_slots, 4);
    assert_eq!(short_count.next_start_time, Some(at(9, 0)));

    let long_count = counts.iter().find(|c| c.service_id == long.service_id).unwrap();
    assert_eq!(long_count.open_slots, 2);
}
