//! # Domain Entities
//!
//! Records owned by the persistence layer and the value objects that
//! flow between the services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::errors::AuthError;
use super::safe_json::MetadataValue;
use super::token::TokenDigest;

/// External platform's numeric user id (Telegram id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub i64);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Company / organization identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session record identifier. Distinct from the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Manager,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Manager => "manager",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "manager" => Ok(Role::Manager),
            "viewer" => Ok(Role::Viewer),
            other => Err(AuthError::MalformedInput(format!("unknown role: {other}"))),
        }
    }
}

/// Persisted session. Never carries a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub secret_digest: TokenDigest,
    pub subject: SubjectId,
    pub tenant_id: Option<TenantId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Subject ↔ tenant binding. Unique on (subject, tenant_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub subject: SubjectId,
    pub tenant_id: TenantId,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of role resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleBinding {
    pub role: Role,
    pub tenant_id: Option<TenantId>,
}

impl RoleBinding {
    /// Binding for a subject with no active membership.
    pub fn default_viewer() -> Self {
        Self {
            role: Role::Viewer,
            tenant_id: None,
        }
    }
}

/// Tenant standing of a validated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantAccess {
    /// No tenant binding at all.
    Unbound,
    /// Active member of the tenant.
    Member(TenantId),
    /// Session is pinned to a tenant the subject no longer belongs to.
    Revoked(TenantId),
}

/// Authenticated caller with a freshly resolved role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub session_id: SessionId,
    pub subject: SubjectId,
    pub role: Role,
    pub tenant: TenantAccess,
}

impl Principal {
    /// Tenant the caller may act in, if any.
    pub fn tenant_id(&self) -> Option<TenantId> {
        match self.tenant {
            TenantAccess::Member(id) => Some(id),
            TenantAccess::Unbound | TenantAccess::Revoked(_) => None,
        }
    }

    /// Tenant for a tenant-scoped operation; fails closed.
    pub fn require_tenant(&self) -> Result<TenantId, AuthError> {
        match self.tenant {
            TenantAccess::Member(id) => Ok(id),
            TenantAccess::Revoked(id) => Err(AuthError::Unauthorized(format!(
                "no active membership in tenant {id}"
            ))),
            TenantAccess::Unbound => Err(AuthError::Unauthorized(
                "operation requires a tenant".into(),
            )),
        }
    }

    /// Empty `allowed` means any role.
    pub fn has_any_role(&self, allowed: &[Role]) -> bool {
        allowed.is_empty() || allowed.contains(&self.role)
    }
}

/// Fixed-window counter for (subject, endpoint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub subject: SubjectId,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub request_count: u32,
}

/// Cached response for an idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub subject: SubjectId,
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Stored Telegram profile, upserted on every login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub subject: SubjectId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub language_code: String,
    pub is_premium: bool,
    pub photo_url: String,
    pub app_version: Option<String>,
    pub last_login_at: DateTime<Utc>,
    pub legal_accepted_at: Option<DateTime<Utc>>,
    pub legal_version: Option<String>,
}

/// Transport facts about the caller, used for audit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Audit trail entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub subject: SubjectId,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub metadata: Option<MetadataValue>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        subject: SubjectId,
        action: impl Into<String>,
        client: &ClientContext,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject,
            action: action.into(),
            resource_type: None,
            resource_id: None,
            metadata: None,
            ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            at,
        }
    }

    pub fn with_resource(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource_type = Some(kind.into());
        self.resource_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataValue) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
