use assert_matches::assert_matches;
use chrono::Utc;
use uuid::Uuid;

use availability_cell::models::AvailabilityError;
use availability_cell::services::SlotMaterializer;
use shared_database::store::{BookingStore, BusySnapshotStore, SlotStore, WindowStore};
use shared_models::scheduling::{
    BookingStatus, BusySnapshot, MaterializationState, NewBooking, SlotStatus, TimeRange,
};
use shared_utils::test_utils::{
    at, guest_client, pending_org_window, provider_window, service, FaultyStore, TestContext,
};

#[tokio::test]
async fn test_materialization_is_idempotent() {
    let ctx = TestContext::new(at(6, 0));
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(10, 0), vec![service(30, Some(0))]);
    ctx.memory.insert_window(&window).await.unwrap();

    let materializer = SlotMaterializer::new(&ctx.state);
    let first = materializer.materialize(window.id).await.unwrap();
    assert_eq!(first.state, MaterializationState::Complete);
    assert_eq!(first.slots_created, 2);

    let second = materializer.materialize(window.id).await.unwrap();
    assert_eq!(second.slots_created, 0);
    assert_eq!(second.slots_retired, 0);
    assert_eq!(second.slots_unchanged, 2);
    assert_eq!(ctx.memory.slot_row_count(window.id).await, 2);

    let slots = ctx.memory.list_window_slots(window.id).await.unwrap();
    let intervals: Vec<_> = slots.iter().map(|s| (s.start_time, s.end_time, s.status)).collect();
    assert_eq!(
        intervals,
        vec![
            (at(9, 0), at(9, 30), SlotStatus::Available),
            (at(9, 30), at(10, 0), SlotStatus::Available),
        ]
    );
}

#[tokio::test]
async fn test_fifty_minute_window_yields_one_slot() {
    let ctx = TestContext::new(at(6, 0));
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(9, 50), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();

    let report = SlotMaterializer::new(&ctx.state).materialize(window.id).await.unwrap();
    assert_eq!(report.slots_created, 1);

    let slots = ctx.memory.list_window_slots(window.id).await.unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].end_time, at(9, 30));
}

#[tokio::test]
async fn test_slots_copy_service_configuration() {
    let ctx = TestContext::new(at(6, 0));
    let mut consult = service(30, None);
    consult.price = Some(80.0);
    consult.in_person = false;
    consult.location_id = Some(Uuid::new_v4());
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(9, 30), vec![consult.clone()]);
    ctx.memory.insert_window(&window).await.unwrap();

    SlotMaterializer::new(&ctx.state).materialize(window.id).await.unwrap();

    let slot = &ctx.memory.list_window_slots(window.id).await.unwrap()[0];
    assert_eq!(slot.price, Some(80.0));
    assert_eq!(slot.duration_minutes, 30);
    assert!(!slot.in_person);
    assert_eq!(slot.location_id, consult.location_id);
    assert_eq!(slot.provider_id, window.provider_id);
}

#[tokio::test]
async fn test_booked_slots_survive_reconfiguration() {
    let ctx = TestContext::new(at(6, 0));
    let consult = service(30, None);
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(10, 0), vec![consult.clone()]);
    ctx.memory.insert_window(&window).await.unwrap();

    let materializer = SlotMaterializer::new(&ctx.state);
    materializer.materialize(window.id).await.unwrap();
    let slots = ctx.memory.list_window_slots(window.id).await.unwrap();
    let booked_slot = slots[0].clone();

    ctx.memory
        .claim_slot(&NewBooking {
            id: Uuid::new_v4(),
            slot_id: booked_slot.id,
            client: guest_client("A"),
            status: BookingStatus::Pending,
            notes: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    // Same service, now 45 minutes: the only candidate overlaps the booking.
    let mut longer = consult.clone();
    longer.duration_minutes = 45;
    ctx.memory
        .update_window_services(window.id, &[longer], at(7, 0))
        .await
        .unwrap();

    let report = materializer.materialize(window.id).await.unwrap();
    assert_eq!(report.state, MaterializationState::Complete);
    assert_eq!(report.slots_created, 0);
    assert_eq!(report.slots_retired, 1);
    assert_eq!(report.skipped_conflicts.len(), 1);

    let live = ctx.memory.list_window_slots(window.id).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, booked_slot.id);
    assert_eq!(live[0].status, SlotStatus::Booked);
    assert_eq!(live[0].end_time, at(9, 30));
}

#[tokio::test]
async fn test_shrunk_window_retires_open_slots() {
    let ctx = TestContext::new(at(6, 0));
    let consult = service(30, None);
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(10, 0), vec![consult.clone()]);
    ctx.memory.insert_window(&window).await.unwrap();
    let materializer = SlotMaterializer::new(&ctx.state);
    materializer.materialize(window.id).await.unwrap();

    let mut shorter = consult;
    shorter.gap_minutes = Some(30);
    ctx.memory
        .update_window_services(window.id, &[shorter], at(7, 0))
        .await
        .unwrap();

    let report = materializer.materialize(window.id).await.unwrap();
    assert_eq!(report.slots_unchanged, 1);
    assert_eq!(report.slots_retired, 1);
    assert_eq!(ctx.memory.list_window_slots(window.id).await.unwrap().len(), 1);
    assert_eq!(ctx.memory.slot_row_count(window.id).await, 2);
}

#[tokio::test]
async fn test_new_slots_honor_stored_busy_time() {
    let ctx = TestContext::new(at(6, 0));
    let provider_id = Uuid::new_v4();
    ctx.memory
        .save_busy_snapshot(&BusySnapshot {
            provider_id,
            location_id: None,
            busy_intervals: vec![TimeRange::new(at(9, 10), at(9, 20)).unwrap()],
            horizon: None,
            received_at: at(5, 0),
        })
        .await
        .unwrap();

    let window = provider_window(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();
    SlotMaterializer::new(&ctx.state).materialize(window.id).await.unwrap();

    let statuses: Vec<_> = ctx
        .memory
        .list_window_slots(window.id)
        .await
        .unwrap()
        .into_iter()
        .map(|slot| slot.status)
        .collect();
    assert_eq!(statuses, vec![SlotStatus::BlockedExternal, SlotStatus::Available]);
}

#[tokio::test]
async fn test_busy_time_outside_snapshot_horizon_is_ignored() {
    let ctx = TestContext::new(at(6, 0));
    let provider_id = Uuid::new_v4();
    ctx.memory
        .save_busy_snapshot(&BusySnapshot {
            provider_id,
            location_id: None,
            busy_intervals: vec![TimeRange::new(at(9, 0), at(10, 0)).unwrap()],
            horizon: Some(TimeRange::new(at(8, 0), at(9, 30)).unwrap()),
            received_at: at(5, 0),
        })
        .await
        .unwrap();

    let window = provider_window(provider_id, at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();
    SlotMaterializer::new(&ctx.state).materialize(window.id).await.unwrap();

    let statuses: Vec<_> = ctx
        .memory
        .list_window_slots(window.id)
        .await
        .unwrap()
        .into_iter()
        .map(|slot| slot.status)
        .collect();
    assert_eq!(statuses, vec![SlotStatus::BlockedExternal, SlotStatus::Available]);
}

#[tokio::test]
async fn test_failed_insert_is_retried_once() {
    let ctx = TestContext::wrapping_store(at(6, 0), |memory| FaultyStore::failing_inserts(memory, 1));
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();

    let report = SlotMaterializer::new(&ctx.state).materialize(window.id).await.unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(report.state, MaterializationState::Complete);
    assert_eq!(report.slots_created, 2);
    assert_eq!(report.slots_unchanged, 1);
    assert_eq!(ctx.memory.slot_row_count(window.id).await, 2);
}

#[tokio::test]
async fn test_persistent_failure_is_reported_and_recorded() {
    let ctx = TestContext::wrapping_store(at(6, 0), FaultyStore::always_failing_inserts);
    let window = provider_window(Uuid::new_v4(), at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();

    let report = SlotMaterializer::new(&ctx.state).materialize(window.id).await.unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(report.state, MaterializationState::Failed);
    assert_eq!(report.errors.len(), 2);

    let stored = ctx.memory.get_window(window.id).await.unwrap().unwrap();
    assert_eq!(stored.materialization, MaterializationState::Failed);
    assert!(stored.materialization_error.is_some());

    let unmaterialized = ctx.memory.list_unmaterialized_windows().await.unwrap();
    assert_eq!(unmaterialized.len(), 1);
    assert_eq!(unmaterialized[0].id, window.id);
}

#[tokio::test]
async fn test_pending_window_cannot_materialize() {
    let ctx = TestContext::new(at(6, 0));
    let window = pending_org_window(Uuid::new_v4(), Uuid::new_v4(), at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();

    let result = SlotMaterializer::new(&ctx.state).materialize(window.id).await;
    assert_matches!(result, Err(AvailabilityError::NotAccepted(_)));
    assert_eq!(ctx.memory.slot_row_count(window.id).await, 0);
}
