mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use tokio_test::assert_ok;
use uuid::Uuid;

use calendar_sync_cell::models::{BusySnapshotRequest, ReconcileError};
use calendar_sync_cell::services::ExternalCalendarReconciler;
use shared_database::cache::{open_slot_counts_key, ReadModelCache};
use shared_database::store::BusySnapshotStore;
use shared_models::scheduling::{SlotStatus, TimeRange};
use shared_utils::notify::TemplateType;
use shared_utils::test_utils::{at, FaultyStore, TestContext, TestUser};

use common::{book, busy, slots_at, status_of};

fn snapshot(intervals: Vec<TimeRange>) -> BusySnapshotRequest {
    BusySnapshotRequest {
        busy_intervals: intervals,
        ..BusySnapshotRequest::default()
    }
}

#[tokio::test]
async fn test_busy_time_blocks_open_slots() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let slots = slots_at(&ctx, provider_id, None, &[at(9, 0), at(9, 30), at(10, 0)]).await;
    let reconciler = ExternalCalendarReconciler::new(&ctx.state);

    let report = reconciler
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 15), at(9, 45))]))
        .await
        .unwrap();

    assert_eq!(report.slots_blocked, 2);
    assert_eq!(report.slots_unchanged, 1);
    assert!(report.errors.is_empty());
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::BlockedExternal);
    assert_eq!(status_of(&ctx, &slots[1]).await, SlotStatus::BlockedExternal);
    assert_eq!(status_of(&ctx, &slots[2]).await, SlotStatus::Available);

    let again = reconciler
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 15), at(9, 45))]))
        .await
        .unwrap();
    assert_eq!(again.slots_blocked, 0);
    assert_eq!(again.slots_released, 0);
    assert_eq!(again.slots_unchanged, 3);
}

#[tokio::test]
async fn test_cleared_busy_time_reopens_slots() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let slots = slots_at(&ctx, provider_id, None, &[at(9, 0), at(9, 30)]).await;
    let reconciler = ExternalCalendarReconciler::new(&ctx.state);

    reconciler
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 0), at(10, 0))]))
        .await
        .unwrap();
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::BlockedExternal);

    let report = reconciler
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 30), at(10, 0))]))
        .await
        .unwrap();
    assert_eq!(report.slots_released, 1);
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::Available);
    assert_eq!(status_of(&ctx, &slots[1]).await, SlotStatus::BlockedExternal);
}

#[tokio::test]
async fn test_booked_slot_is_reported_not_touched() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let slots = slots_at(&ctx, provider_id, None, &[at(9, 0)]).await;
    let booking = book(&ctx, &slots[0]).await;

    let report = ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(8, 45), at(9, 15))]))
        .await
        .unwrap();

    assert_eq!(report.slots_blocked, 0);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].slot_id, slots[0].id);
    assert_eq!(report.conflicts[0].booking_id, Some(booking.id));
    assert_eq!(report.conflicts[0].busy_interval, busy(at(8, 45), at(9, 15)));
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::Booked);

    let sent = ctx.notifier.wait_for(1).await;
    assert_eq!(sent[0].template, TemplateType::ExternalCalendarConflict);
    assert_eq!(sent[0].recipient.user_id, Some(provider_id.to_string()));
    assert_eq!(sent[0].data["booking_id"], booking.id.to_string());
}

#[tokio::test]
async fn test_location_snapshot_only_affects_its_location() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let downtown = Uuid::new_v4();
    let uptown = Uuid::new_v4();
    let downtown_slots = slots_at(&ctx, provider_id, Some(downtown), &[at(9, 0)]).await;
    let uptown_slots = slots_at(&ctx, provider_id, Some(uptown), &[at(9, 0)]).await;

    let report = ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(
            provider_id,
            &provider.actor(),
            BusySnapshotRequest {
                location_id: Some(downtown),
                busy_intervals: vec![busy(at(9, 0), at(9, 30))],
                horizon: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(report.location_id, Some(downtown));
    assert_eq!(report.slots_blocked, 1);
    assert_eq!(status_of(&ctx, &downtown_slots[0]).await, SlotStatus::BlockedExternal);
    assert_eq!(status_of(&ctx, &uptown_slots[0]).await, SlotStatus::Available);

    let stored = ctx.memory.latest_busy_snapshot(provider_id, Some(downtown)).await.unwrap();
    assert_eq!(stored.map(|s| s.received_at), Some(at(6, 0)));
    assert!(ctx.memory.latest_busy_snapshot(provider_id, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_horizon_limits_reconciled_slots() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let slots = slots_at(&ctx, provider_id, None, &[at(9, 0), at(11, 0)]).await;

    let report = ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(
            provider_id,
            &provider.actor(),
            BusySnapshotRequest {
                location_id: None,
                busy_intervals: vec![busy(at(8, 0), at(12, 0))],
                horizon: Some(busy(at(8, 0), at(10, 0))),
            },
        )
        .await
        .unwrap();

    assert_eq!(report.slots_blocked, 1);
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::BlockedExternal);
    assert_eq!(status_of(&ctx, &slots[1]).await, SlotStatus::Available);
}

#[tokio::test]
async fn test_far_future_slots_follow_busy_time_without_horizon() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let far = at(9, 0) + ChronoDuration::days(400);
    let slots = slots_at(&ctx, provider_id, None, &[far]).await;
    let reconciler = ExternalCalendarReconciler::new(&ctx.state);

    let report = reconciler
        .reconcile_external_busy(
            provider_id,
            &provider.actor(),
            snapshot(vec![busy(far - ChronoDuration::hours(1), far + ChronoDuration::hours(1))]),
        )
        .await
        .unwrap();
    assert_eq!(report.slots_blocked, 1);
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::BlockedExternal);

    let cleared = reconciler
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![]))
        .await
        .unwrap();
    assert_eq!(cleared.slots_released, 1);
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::Available);
}

#[tokio::test]
async fn test_reconcile_invalidates_open_slot_cache() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    slots_at(&ctx, provider_id, None, &[at(9, 0)]).await;

    let key = open_slot_counts_key(provider_id);
    ctx.cache.put(&key, json!({ "total": 1 }), Duration::from_secs(300)).await;
    assert!(ctx.cache.get(&key).await.is_some());

    ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 0), at(9, 30))]))
        .await
        .unwrap();
    assert!(ctx.cache.get(&key).await.is_none());
}

#[tokio::test]
async fn test_invalid_interval_is_rejected() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();

    let result = ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(10, 0), at(9, 0))]))
        .await;

    assert_matches!(result, Err(ReconcileError::InvalidInterval(_)));
    assert!(ctx.memory.latest_busy_snapshot(provider_id, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_provider_or_admin_can_sync() {
    let ctx = TestContext::new(at(6, 0));
    let provider_id = Uuid::new_v4();
    let reconciler = ExternalCalendarReconciler::new(&ctx.state);

    for actor in [
        TestUser::provider("other@clinic.example").actor(),
        TestUser::client("client@example.com").actor(),
        TestUser::org_admin("manager@clinic.example", Uuid::new_v4()).actor(),
    ] {
        assert_matches!(
            reconciler
                .reconcile_external_busy(provider_id, &actor, snapshot(vec![]))
                .await,
            Err(ReconcileError::Unauthorized(_))
        );
    }

    let admin = TestUser::admin("ops@example.com").actor();
    assert_ok!(
        reconciler
            .reconcile_external_busy(provider_id, &admin, snapshot(vec![]))
            .await
    );
    assert_eq!(reconciler.busy_snapshots(provider_id, &admin).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let ctx = TestContext::wrapping_store(at(6, 0), |memory| FaultyStore::failing_transitions(memory, 1));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let slots = slots_at(&ctx, provider_id, None, &[at(9, 0)]).await;

    let report = ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 0), at(9, 30))]))
        .await
        .unwrap();

    assert!(report.errors.is_empty());
    assert_eq!(report.slots_blocked, 1);
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::BlockedExternal);
}

#[tokio::test]
async fn test_persistent_failure_is_reported() {
    let ctx = TestContext::wrapping_store(at(6, 0), |memory| FaultyStore::failing_transitions(memory, 10));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();
    let slots = slots_at(&ctx, provider_id, None, &[at(9, 0), at(9, 30)]).await;

    let report = ExternalCalendarReconciler::new(&ctx.state)
        .reconcile_external_busy(provider_id, &provider.actor(), snapshot(vec![busy(at(9, 0), at(10, 0))]))
        .await
        .unwrap();

    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.slots_blocked, 0);
    assert_eq!(status_of(&ctx, &slots[0]).await, SlotStatus::Available);
}
