use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::cache::invalidate_provider;
use shared_database::{ReadModelCache, SchedulingStore};
use shared_models::auth::Actor;
use shared_models::scheduling::{
    AvailabilityWindow, CalculatedSlot, MaterializationState, Proposer, ServiceConfig, TimeRange,
    WindowOwner, WindowStatus,
};
use shared_utils::clock::Clock;
use shared_utils::notify::{dispatch_in_background, NotificationDispatcher, Recipient, TemplateType};
use shared_utils::state::AppState;

use crate::models::{AvailabilityError, MaterializationReport, ProposeWindowRequest, WindowOutcome};
use crate::services::materializer::SlotMaterializer;
use crate::services::rules;

/// Provider, organization manager of the owning organization, or admin.
fn can_manage(actor: &Actor, window: &AvailabilityWindow) -> bool {
    actor.is_provider(window.provider_id)
        || actor.is_admin()
        || window
            .organization_id()
            .is_some_and(|org| actor.manages_organization(org))
}

fn can_view(actor: &Actor, window: &AvailabilityWindow) -> bool {
    can_manage(actor, window)
        || matches!(
            actor,
            Actor::OrganizationMember { organization_id, .. } if window.organization_id() == Some(*organization_id)
        )
}

pub struct WindowService {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn ReadModelCache>,
    materializer: SlotMaterializer,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    notification_timeout: Duration,
}

impl WindowService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            materializer: SlotMaterializer::new(state),
            notifier: state.notifier.clone(),
            clock: state.clock.clone(),
            notification_timeout: state.config.notification_timeout(),
        }
    }

    /// Creates a window. Provider-created windows are accepted and materialized
    /// at once; organization proposals wait for the provider.
    pub async fn propose(
        &self,
        actor: &Actor,
        request: ProposeWindowRequest,
    ) -> Result<WindowOutcome, AvailabilityError> {
        let range = TimeRange::new(request.start_time, request.end_time)
            .map_err(AvailabilityError::InvalidWindow)?;
        rules::generate_candidates(&range, &request.rule, &request.services)?;

        let now = self.clock.now();
        if range.end <= now {
            return Err(AvailabilityError::InvalidWindow(
                "Window must end in the future".to_string(),
            ));
        }

        let (owner, proposer) = resolve_proposal(actor, &request)?;

        let overlapping = self
            .store
            .find_overlapping_windows(request.provider_id, range)
            .await?;
        if let Some(existing) = overlapping.first() {
            debug!(
                "Window {} for provider {} overlaps existing window {}",
                range, request.provider_id, existing.id
            );
            return Err(AvailabilityError::OverlappingWindow(existing.id));
        }

        let provider_created = !proposer.is_organization();
        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            provider_id: request.provider_id,
            owner,
            start_time: range.start,
            end_time: range.end,
            rule: request.rule,
            services: request.services,
            status: if provider_created { WindowStatus::Accepted } else { WindowStatus::Pending },
            proposer,
            accepted_by: provider_created.then(|| actor.user_id().unwrap_or_default()),
            accepted_at: provider_created.then_some(now),
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            materialization: if provider_created {
                MaterializationState::Pending
            } else {
                MaterializationState::NotRequired
            },
            materialization_error: None,
            last_materialized_at: None,
            retired_at: None,
            created_at: now,
            updated_at: now,
        };

        let window = self.store.insert_window(&window).await?;
        info!(
            "Window {} created for provider {} ({})",
            window.id, window.provider_id, window.status
        );

        if !provider_created {
            self.notify_provider_of_proposal(&window);
            return Ok(WindowOutcome { window, materialization: None });
        }

        let materialization = self.materialize_after_write(&window).await;
        let window = self.store.get_window(window.id).await?.unwrap_or(window);
        Ok(WindowOutcome { window, materialization })
    }

    pub async fn get_window(&self, window_id: Uuid, actor: &Actor) -> Result<AvailabilityWindow, AvailabilityError> {
        let window = self.load(window_id).await?;
        if !can_view(actor, &window) {
            return Err(AvailabilityError::Unauthorized(
                "Not authorized to view this window".to_string(),
            ));
        }
        Ok(window)
    }

    pub async fn list_provider_windows(
        &self,
        provider_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let windows = self.store.list_provider_windows(provider_id).await?;
        if actor.is_provider(provider_id) || actor.is_admin() {
            return Ok(windows);
        }
        match actor {
            Actor::OrganizationMember { organization_id, .. } => Ok(windows
                .into_iter()
                .filter(|window| window.organization_id() == Some(*organization_id))
                .collect()),
            _ => Err(AvailabilityError::Unauthorized(
                "Not authorized to list this provider's windows".to_string(),
            )),
        }
    }

    pub async fn list_window_slots(
        &self,
        window_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<CalculatedSlot>, AvailabilityError> {
        let window = self.get_window(window_id, actor).await?;
        Ok(self.store.list_window_slots(window.id).await?)
    }

    /// Accepted windows whose last materialization did not complete, for
    /// operator follow-up through `materialize_slots`.
    pub async fn list_unmaterialized(&self, actor: &Actor) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        if !actor.is_admin() {
            return Err(AvailabilityError::Unauthorized(
                "Only administrators can list unmaterialized windows".to_string(),
            ));
        }
        Ok(self.store.list_unmaterialized_windows().await?)
    }

    pub async fn materialize_slots(
        &self,
        window_id: Uuid,
        actor: &Actor,
    ) -> Result<MaterializationReport, AvailabilityError> {
        let window = self.load(window_id).await?;
        self.authorize_manage(actor, &window)?;
        self.materializer.materialize_window(&window).await
    }

    /// Replaces the service configuration and re-materializes accepted windows.
    /// Booked slots are left as they are.
    pub async fn reconfigure_services(
        &self,
        window_id: Uuid,
        actor: &Actor,
        services: Vec<ServiceConfig>,
    ) -> Result<WindowOutcome, AvailabilityError> {
        let window = self.load(window_id).await?;
        self.authorize_manage(actor, &window)?;
        if window.is_retired() {
            return Err(AvailabilityError::WindowRetired);
        }
        if window.status == WindowStatus::Rejected {
            return Err(AvailabilityError::NotAccepted(window.status));
        }
        rules::generate_candidates(&window.range(), &window.rule, &services)?;

        let updated = self
            .store
            .update_window_services(window_id, &services, self.clock.now())
            .await?
            .ok_or(AvailabilityError::WindowRetired)?;
        info!("Window {} reconfigured with {} services", window_id, services.len());

        if updated.status != WindowStatus::Accepted {
            return Ok(WindowOutcome { window: updated, materialization: None });
        }

        let materialization = self.materialize_after_write(&updated).await;
        let window = self.store.get_window(window_id).await?.unwrap_or(updated);
        Ok(WindowOutcome { window, materialization })
    }

    /// Retires the window and its open slots. Booked slots keep their booking
    /// and are not re-opened by a later cancellation.
    pub async fn retire_window(&self, window_id: Uuid, actor: &Actor) -> Result<AvailabilityWindow, AvailabilityError> {
        let window = self.load(window_id).await?;
        self.authorize_manage(actor, &window)?;
        if window.is_retired() {
            return Err(AvailabilityError::WindowRetired);
        }

        let retired = self
            .store
            .retire_window(window_id, self.clock.now())
            .await?
            .ok_or(AvailabilityError::WindowNotFound)?;
        invalidate_provider(self.cache.as_ref(), retired.provider_id).await;
        info!("Window {} retired", window_id);
        Ok(retired)
    }

    /// Hard delete, refused once any slot of the window has been booked.
    pub async fn delete_window(&self, window_id: Uuid, actor: &Actor) -> Result<(), AvailabilityError> {
        let window = self.load(window_id).await?;
        self.authorize_manage(actor, &window)?;

        if !self.store.delete_window(window_id).await? {
            return Err(AvailabilityError::WindowNotFound);
        }
        invalidate_provider(self.cache.as_ref(), window.provider_id).await;
        info!("Window {} deleted", window_id);
        Ok(())
    }

    async fn load(&self, window_id: Uuid) -> Result<AvailabilityWindow, AvailabilityError> {
        self.store
            .get_window(window_id)
            .await?
            .ok_or(AvailabilityError::WindowNotFound)
    }

    fn authorize_manage(&self, actor: &Actor, window: &AvailabilityWindow) -> Result<(), AvailabilityError> {
        if can_manage(actor, window) {
            Ok(())
        } else {
            Err(AvailabilityError::Unauthorized(
                "Not authorized to manage this window".to_string(),
            ))
        }
    }

    async fn materialize_after_write(&self, window: &AvailabilityWindow) -> Option<MaterializationReport> {
        match self.materializer.materialize_window(window).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Materialization of window {} failed: {}", window.id, e);
                None
            }
        }
    }

    fn notify_provider_of_proposal(&self, window: &AvailabilityWindow) {
        dispatch_in_background(
            self.notifier.clone(),
            Recipient::provider(window.provider_id),
            TemplateType::AvailabilityProposed,
            json!({
                "window_id": window.id,
                "organization_id": window.organization_id(),
                "start_time": window.start_time,
                "end_time": window.end_time,
                "services": window.services.len(),
            }),
            self.notification_timeout,
        );
    }
}

fn resolve_proposal(
    actor: &Actor,
    request: &ProposeWindowRequest,
) -> Result<(WindowOwner, Proposer), AvailabilityError> {
    match actor {
        Actor::Provider { provider_id } if *provider_id == request.provider_id => {
            let owner = request.owner.unwrap_or(WindowOwner::Provider);
            // Organization-owned windows go through the organization's proposal flow.
            if owner.organization_id().is_some() {
                return Err(AvailabilityError::Unauthorized(
                    "Providers cannot publish windows under an organization".to_string(),
                ));
            }
            Ok((owner, Proposer::Provider))
        }
        Actor::Admin { .. } => Ok((request.owner.unwrap_or(WindowOwner::Provider), Proposer::Provider)),
        Actor::OrganizationMember { user_id, organization_id, role } if role.can_manage() => {
            let owner = request.owner.unwrap_or(WindowOwner::Organization {
                organization_id: *organization_id,
            });
            if owner.organization_id() != Some(*organization_id) {
                return Err(AvailabilityError::Unauthorized(
                    "Organizations can only propose windows they own".to_string(),
                ));
            }
            Ok((
                owner,
                Proposer::Organization {
                    organization_id: *organization_id,
                    proposed_by: user_id.clone(),
                },
            ))
        }
        _ => Err(AvailabilityError::Unauthorized(
            "Only the provider or an organization manager can propose availability".to_string(),
        )),
    }
}
