use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::cache::invalidate_provider;
use shared_database::{ReadModelCache, SchedulingStore};
use shared_models::auth::Actor;
use shared_models::error::StoreError;
use shared_models::scheduling::{
    Booking, BookingStatus, CalculatedSlot, CancellationOutcome, ClientIdentity, NewBooking,
};
use shared_utils::clock::Clock;
use shared_utils::notify::{dispatch_in_background, NotificationDispatcher, Recipient, TemplateType};
use shared_utils::state::AppState;

use crate::models::{BookingError, ClaimOutcome, ClaimSlotRequest};

/// Claims and releases slots.
///
/// The claim is one conditional write in the store: the slot flips to booked
/// only while it is still available, and the booking row is written in the
/// same operation. Everything read before that write only produces
/// validation errors. A lost race is reported as `SlotUnavailable` and never
/// retried here.
pub struct BookingClaimService {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn ReadModelCache>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    notification_timeout: Duration,
}

impl BookingClaimService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            notifier: state.notifier.clone(),
            clock: state.clock.clone(),
            notification_timeout: state.config.notification_timeout(),
        }
    }

    pub async fn claim_slot(
        &self,
        slot_id: Uuid,
        actor: &Actor,
        request: ClaimSlotRequest,
    ) -> Result<ClaimOutcome, BookingError> {
        let client = resolve_client(actor, &request)?;

        let slot = self
            .store
            .get_slot(slot_id)
            .await?
            .ok_or(BookingError::SlotNotFound)?;
        let now = self.clock.now();
        if slot.start_time <= now {
            return Err(BookingError::SlotInPast);
        }

        let requires_confirmation = !actor.is_pre_authorized();
        let new_booking = NewBooking {
            id: Uuid::new_v4(),
            slot_id,
            client,
            status: if requires_confirmation {
                BookingStatus::Pending
            } else {
                BookingStatus::Confirmed
            },
            notes: request.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            created_at: now,
        };

        let booking = match self.store.claim_slot(&new_booking).await {
            Ok(booking) => booking,
            Err(StoreError::ConditionFailed(reason)) => {
                info!("Claim of slot {} lost: {}", slot_id, reason);
                return Err(BookingError::SlotUnavailable);
            }
            Err(StoreError::NotFound(_)) => return Err(BookingError::SlotNotFound),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Slot {} booked as {} ({})",
            slot_id, booking.id, booking.status
        );

        invalidate_provider(self.cache.as_ref(), booking.provider_id).await;
        self.notify_created(&booking, &slot);

        Ok(ClaimOutcome { booking, requires_confirmation })
    }

    /// Cancels an active booking and re-opens its slot unless the slot or its
    /// window has been retired in the meantime.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<CancellationOutcome, BookingError> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;

        if !self.can_cancel(actor, &booking).await? {
            return Err(BookingError::Unauthorized(
                "Not authorized to cancel this booking".to_string(),
            ));
        }
        if !booking.status.is_active() {
            return Err(BookingError::InvalidStatusTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let outcome = match self
            .store
            .cancel_booking(booking_id, self.clock.now(), reason)
            .await
        {
            Ok(outcome) => outcome,
            Err(StoreError::ConditionFailed(_)) => {
                // Closed by a concurrent request since the read above.
                let current = self
                    .store
                    .get_booking(booking_id)
                    .await?
                    .map(|b| b.status)
                    .unwrap_or(BookingStatus::Cancelled);
                return Err(BookingError::InvalidStatusTransition {
                    from: current,
                    to: BookingStatus::Cancelled,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if outcome.slot_released {
            info!("Booking {} cancelled, slot {} re-opened", booking_id, booking.slot_id);
        } else {
            info!(
                "Booking {} cancelled, slot {} stays retired",
                booking_id, booking.slot_id
            );
        }

        invalidate_provider(self.cache.as_ref(), outcome.booking.provider_id).await;
        self.notify_cancelled(&outcome.booking);

        Ok(outcome)
    }

    /// Owning client, the provider, an admin, or a manager of the
    /// organization the slot's window belongs to.
    async fn can_cancel(&self, actor: &Actor, booking: &Booking) -> Result<bool, BookingError> {
        if actor.is_provider(booking.provider_id) || actor.is_admin() {
            return Ok(true);
        }
        match actor {
            Actor::Client { user_id } => Ok(booking.client.user_id() == Some(user_id.as_str())),
            Actor::OrganizationMember { organization_id, .. } => {
                Ok(self.slot_organization(booking.slot_id).await?.is_some_and(|org| {
                    org == *organization_id && actor.manages_organization(org)
                }))
            }
            _ => Ok(false),
        }
    }

    async fn slot_organization(&self, slot_id: Uuid) -> Result<Option<Uuid>, BookingError> {
        let Some(slot) = self.store.get_slot(slot_id).await? else {
            return Ok(None);
        };
        let window = self.store.get_window(slot.window_id).await?;
        Ok(window.and_then(|w| w.organization_id()))
    }

    fn notify_created(&self, booking: &Booking, slot: &CalculatedSlot) {
        let data = json!({
            "booking_id": booking.id,
            "slot_id": booking.slot_id,
            "service_id": slot.service_id,
            "start_time": booking.slot_start_time,
            "end_time": booking.slot_end_time,
            "status": booking.status,
        });

        dispatch_in_background(
            self.notifier.clone(),
            Recipient::for_client(&booking.client),
            TemplateType::BookingCreated,
            data.clone(),
            self.notification_timeout,
        );
        dispatch_in_background(
            self.notifier.clone(),
            Recipient::provider(booking.provider_id),
            TemplateType::BookingCreated,
            data,
            self.notification_timeout,
        );
    }

    fn notify_cancelled(&self, booking: &Booking) {
        let data = json!({
            "booking_id": booking.id,
            "slot_id": booking.slot_id,
            "start_time": booking.slot_start_time,
            "reason": booking.cancellation_reason,
        });

        dispatch_in_background(
            self.notifier.clone(),
            Recipient::for_client(&booking.client),
            TemplateType::BookingCancelled,
            data.clone(),
            self.notification_timeout,
        );
        dispatch_in_background(
            self.notifier.clone(),
            Recipient::provider(booking.provider_id),
            TemplateType::BookingCancelled,
            data,
            self.notification_timeout,
        );
    }
}

/// Builds the client identity for the claim. Guests must leave a name and a
/// way to reach them.
fn resolve_client(actor: &Actor, request: &ClaimSlotRequest) -> Result<ClientIdentity, BookingError> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    match actor {
        Actor::Guest => {
            let guest = request.guest.as_ref().ok_or_else(|| {
                BookingError::InvalidClient("Guest bookings require contact details".to_string())
            })?;
            let name = guest.name.trim();
            if name.is_empty() {
                return Err(BookingError::InvalidClient("Guest name is required".to_string()));
            }
            let email = non_empty(&guest.email);
            let phone = non_empty(&guest.phone);
            if email.is_none() && phone.is_none() {
                return Err(BookingError::InvalidClient(
                    "Guest bookings require an email or a phone number".to_string(),
                ));
            }
            if let Some(email) = &email {
                if !email.contains('@') {
                    return Err(BookingError::InvalidClient(format!("Invalid email: {}", email)));
                }
            }
            debug!("Resolved guest client {}", name);
            Ok(ClientIdentity::Guest { name: name.to_string(), email, phone })
        }
        _ => {
            let user_id = actor.user_id().ok_or_else(|| {
                BookingError::InvalidClient("Authenticated client has no user id".to_string())
            })?;
            if request.guest.is_some() {
                warn!("Ignoring guest details sent by authenticated user {}", user_id);
            }
            Ok(ClientIdentity::Registered {
                user_id,
                email: non_empty(&request.email),
                phone: non_empty(&request.phone),
            })
        }
    }
}
