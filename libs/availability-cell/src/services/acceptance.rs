use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::SchedulingStore;
use shared_models::auth::Actor;
use shared_models::scheduling::{AvailabilityWindow, Proposer, WindowStatus, WindowTransition};
use shared_utils::clock::Clock;
use shared_utils::notify::{dispatch_in_background, NotificationDispatcher, Recipient, TemplateType};
use shared_utils::state::AppState;

use crate::models::{AvailabilityError, WindowOutcome};
use crate::services::materializer::SlotMaterializer;

/// Two-party workflow for organization-proposed windows.
///
/// `Pending -> Accepted` (materializes) or `Pending -> Rejected` (terminal).
/// The status is checked before any write and the write itself only applies
/// while the window is still pending, so concurrent decisions have one winner.
pub struct AcceptanceWorkflow {
    store: Arc<dyn SchedulingStore>,
    materializer: SlotMaterializer,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    notification_timeout: Duration,
}

impl AcceptanceWorkflow {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            materializer: SlotMaterializer::new(state),
            notifier: state.notifier.clone(),
            clock: state.clock.clone(),
            notification_timeout: state.config.notification_timeout(),
        }
    }

    pub async fn accept(&self, window_id: Uuid, actor: &Actor) -> Result<WindowOutcome, AvailabilityError> {
        let window = self.pending_window(window_id, WindowStatus::Accepted).await?;

        if !actor.is_provider(window.provider_id) {
            return Err(AvailabilityError::Unauthorized(
                "Only the provider of the window can accept it".to_string(),
            ));
        }

        let transition = WindowTransition::Accept {
            by: actor.user_id().unwrap_or_default(),
            at: self.clock.now(),
        };
        let accepted = self.apply(window_id, &transition).await?;
        info!("Window {} accepted by provider {}", window_id, accepted.provider_id);

        // The acceptance stands whatever happens to materialization.
        let materialization = match self.materializer.materialize_window(&accepted).await {
            Ok(report) => {
                if !report.is_complete() {
                    warn!(
                        "Window {} accepted but materialization is {:?}: {:?}",
                        window_id, report.state, report.errors
                    );
                }
                Some(report)
            }
            Err(e) => {
                warn!("Window {} accepted but materialization failed: {}", window_id, e);
                None
            }
        };

        self.notify_proposer(&accepted, TemplateType::AvailabilityAccepted, None);

        let window = self.store.get_window(window_id).await?.unwrap_or(accepted);
        Ok(WindowOutcome { window, materialization })
    }

    pub async fn reject(
        &self,
        window_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<WindowOutcome, AvailabilityError> {
        let window = self.pending_window(window_id, WindowStatus::Rejected).await?;

        let proposing_org = match &window.proposer {
            Proposer::Organization { organization_id, .. } => Some(*organization_id),
            Proposer::Provider => None,
        };
        let allowed = actor.is_provider(window.provider_id)
            || proposing_org.is_some_and(|org| actor.manages_organization(org));
        if !allowed {
            return Err(AvailabilityError::Unauthorized(
                "Only the provider or an organization manager can reject this window".to_string(),
            ));
        }

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let transition = WindowTransition::Reject {
            by: actor.user_id().unwrap_or_default(),
            at: self.clock.now(),
            reason: reason.clone(),
        };
        let rejected = self.apply(window_id, &transition).await?;
        info!("Window {} rejected ({})", window_id, reason.as_deref().unwrap_or("no reason"));

        self.notify_proposer(&rejected, TemplateType::AvailabilityRejected, reason);

        Ok(WindowOutcome { window: rejected, materialization: None })
    }

    /// Loads the window and fails before any write unless it can move to `target`.
    async fn pending_window(
        &self,
        window_id: Uuid,
        target: WindowStatus,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        let window = self
            .store
            .get_window(window_id)
            .await?
            .ok_or(AvailabilityError::WindowNotFound)?;

        if !window.status.can_transition_to(target) {
            debug!(
                "Rejecting {} of window {} in status {}",
                target, window_id, window.status
            );
            return Err(AvailabilityError::NotPendingAcceptance(window.status));
        }
        if window.is_retired() {
            return Err(AvailabilityError::WindowRetired);
        }
        Ok(window)
    }

    async fn apply(
        &self,
        window_id: Uuid,
        transition: &WindowTransition,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        match self.store.transition_window(window_id, transition).await? {
            Some(window) => Ok(window),
            None => {
                // Lost to a concurrent decision or retirement.
                let current = self
                    .store
                    .get_window(window_id)
                    .await?
                    .ok_or(AvailabilityError::WindowNotFound)?;
                if current.is_retired() {
                    Err(AvailabilityError::WindowRetired)
                } else {
                    Err(AvailabilityError::NotPendingAcceptance(current.status))
                }
            }
        }
    }

    fn notify_proposer(&self, window: &AvailabilityWindow, template: TemplateType, reason: Option<String>) {
        let Proposer::Organization { organization_id, proposed_by } = &window.proposer else {
            return;
        };
        dispatch_in_background(
            self.notifier.clone(),
            Recipient::organization(*organization_id),
            template,
            json!({
                "window_id": window.id,
                "provider_id": window.provider_id,
                "proposed_by": proposed_by,
                "start_time": window.start_time,
                "end_time": window.end_time,
                "reason": reason,
            }),
            self.notification_timeout,
        );
    }
}
