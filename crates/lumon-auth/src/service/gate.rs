//! # Request Gate
//!
//! Composition of the per-request checks around a guarded action:
//!
//! ```text
//! session → role → access (roles, tenant, CSRF) → rate limit
//!         → idempotency lookup → action → envelope
//!         → idempotency record → tail: audit
//! ```
//!
//! Anything failing before the action short-circuits it. The idempotency
//! record is stored before the response is returned, so a retry sent as
//! soon as the first reply arrives is replayed. Failures after the action
//! are logged and never affect the body.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::adapters::tail::{TailDispatcher, TailJob};
use crate::domain::{
    ApiResponse, AuditEvent, AuthError, ClientContext, CsrfTokens, MetadataLimits, MetadataValue,
    Principal, Role,
};
use crate::ports::Clock;
use crate::service::idempotency::IdempotencyCache;
use crate::service::rate_limiter::RateLimiter;
use crate::service::role_resolver::RoleResolver;
use crate::service::session_store::SessionStore;

/// Declaration of what a guarded endpoint requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedAction {
    /// Rate limit table key and audit suffix.
    pub endpoint: String,
    /// Empty means any role.
    pub required_roles: Vec<Role>,
    pub tenant_scoped: bool,
    pub requires_csrf: bool,
}

impl GuardedAction {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            required_roles: Vec::new(),
            tenant_scoped: false,
            requires_csrf: false,
        }
    }

    pub fn roles(mut self, roles: &[Role]) -> Self {
        self.required_roles = roles.to_vec();
        self
    }

    pub fn tenant_scoped(mut self) -> Self {
        self.tenant_scoped = true;
        self
    }

    pub fn with_csrf(mut self) -> Self {
        self.requires_csrf = true;
        self
    }
}

/// Transport-level inputs of a guarded write.
#[derive(Debug, Clone, Default)]
pub struct GuardedRequest {
    pub session_secret: String,
    pub idempotency_key: Option<String>,
    pub csrf_token: Option<String>,
    pub client: ClientContext,
}

impl GuardedRequest {
    pub fn new(session_secret: impl Into<String>) -> Self {
        Self {
            session_secret: session_secret.into(),
            ..Self::default()
        }
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    pub fn client(mut self, client: ClientContext) -> Self {
        self.client = client;
        self
    }
}

/// Serialized success envelope plus whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedResponse {
    pub body: String,
    pub replayed: bool,
}

pub struct RequestGate {
    sessions: Arc<SessionStore>,
    roles: Arc<RoleResolver>,
    rate_limiter: Arc<RateLimiter>,
    idempotency: Arc<IdempotencyCache>,
    csrf: Arc<CsrfTokens>,
    tail: Arc<TailDispatcher>,
    clock: Arc<dyn Clock>,
}

impl RequestGate {
    pub fn new(
        sessions: Arc<SessionStore>,
        roles: Arc<RoleResolver>,
        rate_limiter: Arc<RateLimiter>,
        idempotency: Arc<IdempotencyCache>,
        csrf: Arc<CsrfTokens>,
        tail: Arc<TailDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            roles,
            rate_limiter,
            idempotency,
            csrf,
            tail,
            clock,
        }
    }

    /// Run a state-changing action behind every check.
    pub async fn execute_guarded<T, F, Fut>(
        &self,
        request: GuardedRequest,
        action: &GuardedAction,
        op: F,
    ) -> Result<GuardedResponse, AuthError>
    where
        T: Serialize,
        F: FnOnce(Principal) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let _timer = lumon_telemetry::time_histogram!(lumon_telemetry::GATE_DURATION);

        let principal = self.authorize(&request.session_secret, action).await?;

        if action.requires_csrf {
            let token = request
                .csrf_token
                .as_deref()
                .ok_or_else(|| AuthError::Forbidden("CSRF token missing".into()))?;
            self.csrf
                .validate(token, &principal.session_id.to_string(), self.clock.now())?;
        }
        if let Some(key) = &request.idempotency_key {
            self.idempotency.validate_key(key)?;
        }

        self.rate_limiter
            .check_and_increment(principal.subject, &action.endpoint)
            .await?;

        if let Some(key) = &request.idempotency_key {
            if let Some(body) = self.idempotency.lookup(key, principal.subject).await? {
                lumon_telemetry::metric_inc!(lumon_telemetry::IDEMPOTENT_REPLAYS);
                tracing::debug!(
                    subject = %principal.subject,
                    endpoint = %action.endpoint,
                    "Replaying cached response"
                );
                return Ok(GuardedResponse {
                    body,
                    replayed: true,
                });
            }
        }

        let subject = principal.subject;
        let audit_base = self.audit_event(&principal, action, &request.client);
        let data = op(principal).await?;
        let body = ApiResponse::ok(data).to_body()?;

        if let Some(key) = &request.idempotency_key {
            if let Err(e) = self.idempotency.remember(key, subject, body.clone()).await {
                tracing::warn!(error = %e, "Idempotency record not persisted");
            }
        }
        self.tail.dispatch(TailJob::Audit(audit_base));

        Ok(GuardedResponse {
            body,
            replayed: false,
        })
    }

    /// Run a read-only action: session and role checks only.
    pub async fn execute_read<T, F, Fut>(
        &self,
        session_secret: &str,
        action: &GuardedAction,
        op: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce(Principal) -> Fut,
        Fut: Future<Output = Result<T, AuthError>>,
    {
        let principal = self.authorize(session_secret, action).await?;
        op(principal).await
    }

    async fn authorize(&self, secret: &str, action: &GuardedAction) -> Result<Principal, AuthError> {
        let session = self.sessions.validate(secret).await?;
        let principal = self.roles.resolve_for_session(&session).await?;

        if !principal.has_any_role(&action.required_roles) {
            lumon_telemetry::log_rejection!(
                "role_denied",
                "Role not permitted for endpoint",
                subject = %principal.subject,
                endpoint = %action.endpoint,
                role = %principal.role
            );
            return Err(AuthError::Unauthorized(format!(
                "role {} may not call {}",
                principal.role, action.endpoint
            )));
        }
        if action.tenant_scoped {
            principal.require_tenant()?;
        }
        Ok(principal)
    }

    fn audit_event(
        &self,
        principal: &Principal,
        action: &GuardedAction,
        client: &ClientContext,
    ) -> AuditEvent {
        let event = AuditEvent::new(
            principal.subject,
            format!("gate.{}", action.endpoint),
            client,
            self.clock.now(),
        );
        let metadata = serde_json::json!({
            "role": principal.role.as_str(),
            "tenant_id": principal.tenant_id().map(|t| t.to_string()),
        });
        match MetadataValue::from_json(&metadata, &MetadataLimits::default()) {
            Ok(metadata) => event.with_metadata(metadata),
            Err(_) => event,
        }
    }
}
