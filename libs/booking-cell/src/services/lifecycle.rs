use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::SchedulingStore;
use shared_models::auth::Actor;
use shared_models::scheduling::{Booking, BookingStatus};
use shared_utils::clock::Clock;
use shared_utils::notify::{dispatch_in_background, NotificationDispatcher, Recipient, TemplateType};
use shared_utils::state::AppState;

use crate::models::BookingError;

/// Valid next statuses for a booking. Cancellation goes through the claim
/// service because it also releases the slot.
pub fn valid_transitions(current: BookingStatus) -> &'static [BookingStatus] {
    match current {
        BookingStatus::Pending => &[BookingStatus::Confirmed, BookingStatus::Cancelled],
        BookingStatus::Confirmed => &[
            BookingStatus::Cancelled,
            BookingStatus::Completed,
            BookingStatus::NoShow,
        ],
        // Terminal states
        BookingStatus::Cancelled | BookingStatus::Completed | BookingStatus::NoShow => &[],
    }
}

pub fn validate_status_transition(current: BookingStatus, next: BookingStatus) -> Result<(), BookingError> {
    if !valid_transitions(current).contains(&next) {
        warn!("Invalid booking transition attempted: {} -> {}", current, next);
        return Err(BookingError::InvalidStatusTransition { from: current, to: next });
    }
    Ok(())
}

/// Provider-side status changes after a booking has been placed.
pub struct BookingLifecycleService {
    store: Arc<dyn SchedulingStore>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    notification_timeout: Duration,
}

impl BookingLifecycleService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            notifier: state.notifier.clone(),
            clock: state.clock.clone(),
            notification_timeout: state.config.notification_timeout(),
        }
    }

    /// Visible to the booking's client, the provider, and admins.
    pub async fn get_booking(&self, booking_id: Uuid, actor: &Actor) -> Result<Booking, BookingError> {
        let booking = self.load(booking_id).await?;
        let is_owner = match actor {
            Actor::Client { user_id } => booking.client.user_id() == Some(user_id.as_str()),
            _ => false,
        };
        if !(is_owner || actor.is_provider(booking.provider_id) || actor.is_admin()) {
            return Err(BookingError::Unauthorized(
                "Not authorized to view this booking".to_string(),
            ));
        }
        Ok(booking)
    }

    pub async fn confirm_booking(&self, booking_id: Uuid, actor: &Actor) -> Result<Booking, BookingError> {
        let booking = self.transition(booking_id, actor, BookingStatus::Confirmed).await?;
        dispatch_in_background(
            self.notifier.clone(),
            Recipient::for_client(&booking.client),
            TemplateType::BookingConfirmed,
            json!({
                "booking_id": booking.id,
                "slot_id": booking.slot_id,
                "start_time": booking.slot_start_time,
                "end_time": booking.slot_end_time,
            }),
            self.notification_timeout,
        );
        Ok(booking)
    }

    pub async fn complete_booking(&self, booking_id: Uuid, actor: &Actor) -> Result<Booking, BookingError> {
        self.transition(booking_id, actor, BookingStatus::Completed).await
    }

    pub async fn mark_no_show(&self, booking_id: Uuid, actor: &Actor) -> Result<Booking, BookingError> {
        self.transition(booking_id, actor, BookingStatus::NoShow).await
    }

    async fn transition(
        &self,
        booking_id: Uuid,
        actor: &Actor,
        next: BookingStatus,
    ) -> Result<Booking, BookingError> {
        let booking = self.load(booking_id).await?;
        if !actor.is_provider(booking.provider_id) {
            return Err(BookingError::Unauthorized(format!(
                "Only the provider can mark a booking {}",
                next
            )));
        }

        validate_status_transition(booking.status, next)?;

        let now = self.clock.now();
        if matches!(next, BookingStatus::Completed | BookingStatus::NoShow) && now < booking.slot_end_time {
            debug!(
                "Booking {} cannot be {} before {}",
                booking_id, next, booking.slot_end_time
            );
            return Err(BookingError::SlotNotEnded);
        }

        match self
            .store
            .transition_booking(booking_id, booking.status, next, now)
            .await?
        {
            Some(updated) => {
                info!("Booking {} moved {} -> {}", booking_id, booking.status, next);
                Ok(updated)
            }
            None => {
                // Changed by a concurrent request since the read above.
                let current = self.load(booking_id).await?;
                Err(BookingError::InvalidStatusTransition { from: current.status, to: next })
            }
        }
    }

    async fn load(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)
    }
}
