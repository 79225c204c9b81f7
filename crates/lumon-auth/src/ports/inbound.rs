//! Driving Ports (API - Inbound)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AuthResult, ClientContext, CsrfToken, Principal, Role, SessionId, SessionSecret, SubjectId,
    TenantId, UserProfile,
};

/// Result of a successful login.
///
/// Holds the plaintext session secret; this is the only place it is
/// ever returned.
#[derive(Debug)]
pub struct AuthInitOutcome {
    pub session_secret: SessionSecret,
    pub session_id: SessionId,
    pub subject: SubjectId,
    pub role: Role,
    pub tenant_id: Option<TenantId>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub principal: Principal,
    pub expires_at: DateTime<Utc>,
}

/// Primary auth API
///
/// Every operation re-resolves the caller's role from memberships.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Verify a signed identity assertion and open a session.
    async fn auth_init(
        &self,
        assertion: &str,
        app_version: Option<&str>,
        client: &ClientContext,
    ) -> AuthResult<AuthInitOutcome>;

    /// Validate a session secret.
    async fn validate(&self, secret: &str) -> AuthResult<Principal>;

    /// Validate and extend a session.
    async fn refresh(&self, secret: &str) -> AuthResult<RefreshOutcome>;

    /// Revoke a session. Unknown secrets succeed.
    async fn logout(&self, secret: &str, client: &ClientContext) -> AuthResult<()>;

    /// Issue a CSRF token bound to the caller's session.
    async fn csrf_token(&self, secret: &str) -> AuthResult<CsrfToken>;

    /// Record acceptance of the legal documents.
    async fn accept_legal(
        &self,
        assertion: &str,
        version: Option<&str>,
        client: &ClientContext,
    ) -> AuthResult<UserProfile>;
}
