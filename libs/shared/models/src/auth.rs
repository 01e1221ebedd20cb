use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    fn metadata_uuid(&self, key: &str) -> Option<Uuid> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get(key))
            .and_then(|value| value.as_str())
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Staff,
}

impl OrgRole {
    /// Owners and admins may act on behalf of the organization.
    pub fn can_manage(&self) -> bool {
        matches!(self, OrgRole::Owner | OrgRole::Admin)
    }
}

/// The caller on whose behalf a core operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Provider { provider_id: Uuid },
    OrganizationMember { user_id: String, organization_id: Uuid, role: OrgRole },
    Client { user_id: String },
    Admin { user_id: String },
    Guest,
}

impl Actor {
    /// Resolve an authenticated user into an actor.
    ///
    /// Providers and organization members carry their ids in token metadata
    /// (`provider_id`, `organization_id`); a provider without an explicit
    /// `provider_id` is identified by the user id itself.
    pub fn from_user(user: &User) -> Self {
        let role = user.role.as_deref().unwrap_or("client");

        match role {
            "admin" | "service_role" => Actor::Admin { user_id: user.id.clone() },
            "provider" | "doctor" => {
                let provider_id = user
                    .metadata_uuid("provider_id")
                    .or_else(|| Uuid::parse_str(&user.id).ok());
                match provider_id {
                    Some(provider_id) => Actor::Provider { provider_id },
                    None => Actor::Client { user_id: user.id.clone() },
                }
            }
            "org_owner" | "org_admin" | "org_staff" => {
                let org_role = match role {
                    "org_owner" => OrgRole::Owner,
                    "org_admin" => OrgRole::Admin,
                    _ => OrgRole::Staff,
                };
                match user.metadata_uuid("organization_id") {
                    Some(organization_id) => Actor::OrganizationMember {
                        user_id: user.id.clone(),
                        organization_id,
                        role: org_role,
                    },
                    None => Actor::Client { user_id: user.id.clone() },
                }
            }
            _ => Actor::Client { user_id: user.id.clone() },
        }
    }

    /// Whether bookings placed by this actor skip the pending step.
    pub fn is_pre_authorized(&self) -> bool {
        matches!(
            self,
            Actor::Provider { .. } | Actor::OrganizationMember { .. } | Actor::Admin { .. }
        )
    }

    pub fn is_provider(&self, provider_id: Uuid) -> bool {
        matches!(self, Actor::Provider { provider_id: id } if *id == provider_id)
    }

    pub fn manages_organization(&self, organization_id: Uuid) -> bool {
        match self {
            Actor::OrganizationMember { organization_id: id, role, .. } => {
                *id == organization_id && role.can_manage()
            }
            Actor::Admin { .. } => true,
            _ => false,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin { .. })
    }

    pub fn user_id(&self) -> Option<String> {
        match self {
            Actor::Provider { provider_id } => Some(provider_id.to_string()),
            Actor::OrganizationMember { user_id, .. }
            | Actor::Client { user_id }
            | Actor::Admin { user_id } => Some(user_id.clone()),
            Actor::Guest => None,
        }
    }
}
