//! Notification port. Delivery (email, SMS, WhatsApp) is owned by an outside
//! collaborator; the scheduling core only hands over a recipient, a template
//! and its data, and never lets a delivery failure affect the operation that
//! triggered it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use shared_models::scheduling::ClientIdentity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Whatsapp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Set instead of `user_id` when the whole organization is addressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub channel: NotificationChannel,
}

impl Recipient {
    /// Email when the client left one, SMS otherwise.
    pub fn for_client(client: &ClientIdentity) -> Self {
        let channel = if client.email().is_some() {
            NotificationChannel::Email
        } else {
            NotificationChannel::Sms
        };
        let name = match client {
            ClientIdentity::Guest { name, .. } => Some(name.clone()),
            ClientIdentity::Registered { .. } => None,
        };
        Self {
            user_id: client.user_id().map(str::to_string),
            organization_id: None,
            name,
            email: client.email().map(str::to_string),
            phone: client.phone().map(str::to_string),
            channel,
        }
    }

    /// Provider contact details are resolved by the delivery service.
    pub fn provider(provider_id: Uuid) -> Self {
        Self {
            user_id: Some(provider_id.to_string()),
            organization_id: None,
            name: None,
            email: None,
            phone: None,
            channel: NotificationChannel::Email,
        }
    }

    pub fn organization(organization_id: Uuid) -> Self {
        Self {
            user_id: None,
            organization_id: Some(organization_id),
            name: None,
            email: None,
            phone: None,
            channel: NotificationChannel::Email,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemplateType {
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,
    AvailabilityProposed,
    AvailabilityAccepted,
    AvailabilityRejected,
    ExternalCalendarConflict,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn delivered() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, recipient: &Recipient, template: TemplateType, data: Value) -> NotificationResult;
}

/// Posts notification requests to the delivery service's webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    async fn notify(&self, recipient: &Recipient, template: TemplateType, data: Value) -> NotificationResult {
        let body = json!({
            "recipient": recipient,
            "template": template,
            "data": data,
        });

        debug!("Sending {:?} notification to {}", template, self.url);

        let response = match self.client.post(&self.url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Notification webhook request failed: {}", e);
                return NotificationResult::failed(e.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Notification webhook rejected {:?}: {} - {}", template, status, text);
            return NotificationResult::failed(format!("HTTP {}: {}", status, text));
        }

        NotificationResult::delivered()
    }
}

/// Used when no delivery service is configured.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationDispatcher for LoggingNotifier {
    async fn notify(&self, recipient: &Recipient, template: TemplateType, data: Value) -> NotificationResult {
        info!(
            "Notification {:?} via {:?} to user {:?} / organization {:?}: {}",
            template, recipient.channel, recipient.user_id, recipient.organization_id, data
        );
        NotificationResult::delivered()
    }
}

/// Fire-and-forget dispatch. The returned handle is only awaited by tests.
pub fn dispatch_in_background(
    notifier: Arc<dyn NotificationDispatcher>,
    recipient: Recipient,
    template: TemplateType,
    data: Value,
    timeout: Duration,
) -> JoinHandle<NotificationResult> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, notifier.notify(&recipient, template, data)).await {
            Ok(result) => {
                if !result.success {
                    warn!(
                        "Notification {:?} failed: {}",
                        template,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
                result
            }
            Err(_) => {
                warn!("Notification {:?} timed out after {:?}", template, timeout);
                NotificationResult::failed("timed out")
            }
        }
    })
}
