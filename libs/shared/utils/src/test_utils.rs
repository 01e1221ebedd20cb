use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, StorageBackend};
use shared_database::store::{BookingStore, BusySnapshotStore, SlotStore, WindowStore};
use shared_database::{InMemoryReadModelCache, InMemorySchedulingStore, SchedulingStore};
use shared_models::error::StoreError;
use shared_models::auth::{Actor, User};
use shared_models::scheduling::{
    AvailabilityWindow, Booking, BookingStatus, BusySnapshot, CalculatedSlot, CancellationOutcome,
    ClientIdentity, MaterializationRecord, MaterializationState, NewBooking, Proposer,
    SchedulingRule, ServiceConfig, SlotStatus, TimeRange, WindowOwner, WindowStatus,
    WindowTransition,
};

use crate::clock::FixedClock;
use crate::notify::{NotificationDispatcher, NotificationResult, Recipient, TemplateType};
use crate::state::AppState;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: "test-service-role-key".to_string(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            storage_backend: StorageBackend::Memory,
            notification_timeout_ms: 500,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub app_metadata: Option<Value>,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::new("test@example.com", "client")
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            app_metadata: None,
        }
    }

    pub fn client(email: &str) -> Self {
        Self::new(email, "client")
    }

    /// A provider whose user id doubles as the provider id.
    pub fn provider(email: &str) -> Self {
        Self::new(email, "provider")
    }

    pub fn provider_with_id(email: &str, provider_id: Uuid) -> Self {
        Self {
            id: provider_id.to_string(),
            ..Self::new(email, "provider")
        }
    }

    pub fn org_admin(email: &str, organization_id: Uuid) -> Self {
        Self {
            app_metadata: Some(json!({ "organization_id": organization_id.to_string() })),
            ..Self::new(email, "org_admin")
        }
    }

    pub fn org_staff(email: &str, organization_id: Uuid) -> Self {
        Self {
            app_metadata: Some(json!({ "organization_id": organization_id.to_string() })),
            ..Self::new(email, "org_staff")
        }
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: self.app_metadata.clone(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::from_user(&self.to_user())
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let mut payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });
        if let Some(app_metadata) = &user.app_metadata {
            payload["app_metadata"] = app_metadata.clone();
        }

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

// ==============================================================================
// NOTIFICATIONS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub recipient: Recipient,
    pub template: TemplateType,
    pub data: Value,
}

/// Records every notification; optionally reports each one as failed.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: true }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn templates(&self) -> Vec<TemplateType> {
        self.sent().into_iter().map(|n| n.template).collect()
    }

    /// Polls until `count` notifications arrived or one second passed.
    pub async fn wait_for(&self, count: usize) -> Vec<SentNotification> {
        for _ in 0..100 {
            if self.sent().len() >= count {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, recipient: &Recipient, template: TemplateType, data: Value) -> NotificationResult {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentNotification {
                recipient: recipient.clone(),
                template,
                data,
            });
        if self.fail {
            NotificationResult::failed("delivery disabled")
        } else {
            NotificationResult::delivered()
        }
    }
}

// ==============================================================================
// APP STATE
// ==============================================================================

/// In-memory application state with handles on every collaborator.
pub struct TestContext {
    pub state: Arc<AppState>,
    pub memory: Arc<InMemorySchedulingStore>,
    pub cache: Arc<InMemoryReadModelCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
}

impl TestContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::wrapping_store(now, |memory| memory as Arc<dyn SchedulingStore>)
    }

    /// Lets a test put a decorator in front of the in-memory store.
    pub fn wrapping_store<F>(now: DateTime<Utc>, wrap: F) -> Self
    where
        F: FnOnce(Arc<InMemorySchedulingStore>) -> Arc<dyn SchedulingStore>,
    {
        let memory = Arc::new(InMemorySchedulingStore::new());
        let cache = Arc::new(InMemoryReadModelCache::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(FixedClock::new(now));

        let state = Arc::new(AppState::new(
            TestConfig::default().to_arc(),
            wrap(memory.clone()),
            cache.clone(),
            notifier.clone(),
            clock.clone(),
        ));

        Self { state, memory, cache, notifier, clock }
    }
}

// ==============================================================================
// FAULT INJECTION
// ==============================================================================

/// In-memory store whose slot writes fail a set number of times, the way a
/// concurrent materialization run collides on the live-slot unique index or
/// a backend call times out.
pub struct FaultyStore {
    inner: Arc<InMemorySchedulingStore>,
    insert_failures: AtomicUsize,
    transition_failures: AtomicUsize,
}

impl FaultyStore {
    fn new(inner: Arc<InMemorySchedulingStore>, inserts: usize, transitions: usize) -> Arc<dyn SchedulingStore> {
        Arc::new(Self {
            inner,
            insert_failures: AtomicUsize::new(inserts),
            transition_failures: AtomicUsize::new(transitions),
        })
    }

    pub fn failing_inserts(inner: Arc<InMemorySchedulingStore>, failures: usize) -> Arc<dyn SchedulingStore> {
        Self::new(inner, failures, 0)
    }

    pub fn always_failing_inserts(inner: Arc<InMemorySchedulingStore>) -> Arc<dyn SchedulingStore> {
        Self::new(inner, usize::MAX, 0)
    }

    pub fn failing_transitions(inner: Arc<InMemorySchedulingStore>, failures: usize) -> Arc<dyn SchedulingStore> {
        Self::new(inner, 0, failures)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl WindowStore for FaultyStore {
    async fn insert_window(&self, window: &AvailabilityWindow) -> Result<AvailabilityWindow, StoreError> {
        self.inner.insert_window(window).await
    }

    async fn get_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError> {
        self.inner.get_window(window_id).await
    }

    async fn list_provider_windows(&self, provider_id: Uuid) -> Result<Vec<AvailabilityWindow>, StoreError> {
        self.inner.list_provider_windows(provider_id).await
    }

    async fn find_overlapping_windows(
        &self,
        provider_id: Uuid,
        range: TimeRange,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        self.inner.find_overlapping_windows(provider_id, range).await
    }

    async fn transition_window(
        &self,
        window_id: Uuid,
        transition: &WindowTransition,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        self.inner.transition_window(window_id, transition).await
    }

    async fn update_window_services(
        &self,
        window_id: Uuid,
        services: &[ServiceConfig],
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        self.inner.update_window_services(window_id, services, at).await
    }

    async fn record_materialization(
        &self,
        window_id: Uuid,
        record: &MaterializationRecord,
    ) -> Result<(), StoreError> {
        self.inner.record_materialization(window_id, record).await
    }

    async fn list_unmaterialized_windows(&self) -> Result<Vec<AvailabilityWindow>, StoreError> {
        self.inner.list_unmaterialized_windows().await
    }

    async fn retire_window(
        &self,
        window_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<AvailabilityWindow>, StoreError> {
        self.inner.retire_window(window_id, at).await
    }

    async fn delete_window(&self, window_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_window(window_id).await
    }
}

#[async_trait]
impl SlotStore for FaultyStore {
    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<CalculatedSlot>, StoreError> {
        self.inner.get_slot(slot_id).await
    }

    async fn list_window_slots(&self, window_id: Uuid) -> Result<Vec<CalculatedSlot>, StoreError> {
        self.inner.list_window_slots(window_id).await
    }

    async fn insert_slot(&self, slot: &CalculatedSlot) -> Result<CalculatedSlot, StoreError> {
        if Self::take_failure(&self.insert_failures) {
            return Err(StoreError::UniqueViolation(format!(
                "slot for service {} at {}",
                slot.service_id, slot.start_time
            )));
        }
        self.inner.insert_slot(slot).await
    }

    async fn retire_slot(&self, slot_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.retire_slot(slot_id, at).await
    }

    async fn transition_slot(
        &self,
        slot_id: Uuid,
        from: SlotStatus,
        to: SlotStatus,
    ) -> Result<bool, StoreError> {
        if Self::take_failure(&self.transition_failures) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        self.inner.transition_slot(slot_id, from, to).await
    }

    async fn list_provider_slots(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
        range: TimeRange,
    ) -> Result<Vec<CalculatedSlot>, StoreError> {
        self.inner.list_provider_slots(provider_id, location_id, range).await
    }
}

#[async_trait]
impl BookingStore for FaultyStore {
    async fn claim_slot(&self, booking: &NewBooking) -> Result<Booking, StoreError> {
        self.inner.claim_slot(booking).await
    }

    async fn cancel_booking(
        &self,
        booking_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, StoreError> {
        self.inner.cancel_booking(booking_id, at, reason).await
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.get_booking(booking_id).await
    }

    async fn active_booking_for_slot(&self, slot_id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.active_booking_for_slot(slot_id).await
    }

    async fn transition_booking(
        &self,
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        self.inner.transition_booking(booking_id, from, to, at).await
    }
}

#[async_trait]
impl BusySnapshotStore for FaultyStore {
    async fn save_busy_snapshot(&self, snapshot: &BusySnapshot) -> Result<(), StoreError> {
        self.inner.save_busy_snapshot(snapshot).await
    }

    async fn latest_busy_snapshot(
        &self,
        provider_id: Uuid,
        location_id: Option<Uuid>,
    ) -> Result<Option<BusySnapshot>, StoreError> {
        self.inner.latest_busy_snapshot(provider_id, location_id).await
    }

    async fn provider_busy_snapshots(&self, provider_id: Uuid) -> Result<Vec<BusySnapshot>, StoreError> {
        self.inner.provider_busy_snapshots(provider_id).await
    }
}

// ==============================================================================
// FIXTURES
// ==============================================================================

/// A fixed day in the future used by scheduling fixtures.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 15, hour, minute, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn service(duration_minutes: i32, gap_minutes: Option<i32>) -> ServiceConfig {
    ServiceConfig {
        service_id: Uuid::new_v4(),
        duration_minutes,
        gap_minutes,
        price: Some(100.0),
        online: true,
        in_person: true,
        location_id: None,
    }
}

/// Provider-owned, accepted window awaiting materialization.
pub fn provider_window(
    provider_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    services: Vec<ServiceConfig>,
) -> AvailabilityWindow {
    AvailabilityWindow {
        id: Uuid::new_v4(),
        provider_id,
        owner: WindowOwner::Provider,
        start_time: start,
        end_time: end,
        rule: SchedulingRule::default(),
        services,
        status: WindowStatus::Accepted,
        proposer: Proposer::Provider,
        accepted_by: Some(provider_id.to_string()),
        accepted_at: Some(start - Duration::days(7)),
        rejected_by: None,
        rejected_at: None,
        rejection_reason: None,
        materialization: MaterializationState::Pending,
        materialization_error: None,
        last_materialized_at: None,
        retired_at: None,
        created_at: start - Duration::days(7),
        updated_at: start - Duration::days(7),
    }
}

/// Organization-proposed window still waiting for the provider.
pub fn pending_org_window(
    provider_id: Uuid,
    organization_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    services: Vec<ServiceConfig>,
) -> AvailabilityWindow {
    AvailabilityWindow {
        owner: WindowOwner::Organization { organization_id },
        status: WindowStatus::Pending,
        proposer: Proposer::Organization {
            organization_id,
            proposed_by: Uuid::new_v4().to_string(),
        },
        accepted_by: None,
        accepted_at: None,
        materialization: MaterializationState::NotRequired,
        ..provider_window(provider_id, start, end, services)
    }
}

pub fn registered_client(user_id: &str) -> ClientIdentity {
    ClientIdentity::Registered {
        user_id: user_id.to_string(),
        email: Some("client@example.com".to_string()),
        phone: None,
    }
}

pub fn guest_client(name: &str) -> ClientIdentity {
    ClientIdentity::Guest {
        name: name.to_string(),
        email: Some("guest@example.com".to_string()),
        phone: Some("+15550100".to_string()),
    }
}
