//! # Auth Service
//!
//! Implements [`AuthApi`]: login from a signed identity assertion, session
//! validation, refresh, logout, CSRF issuance and legal acceptance.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::tail::{TailDispatcher, TailJob};
use crate::domain::{
    AuditEvent, AuthError, AuthResult, ClientContext, CsrfToken, CsrfTokens, IdentityVerifier,
    LegalConfig, MetadataLimits, MetadataValue, Principal, UserProfile, VerifiedIdentity,
};
use crate::ports::{AuthApi, AuthInitOutcome, Clock, RefreshOutcome, UserRepository};
use crate::service::deadline::with_deadline;
use crate::service::role_resolver::RoleResolver;
use crate::service::session_store::SessionStore;

const DEFAULT_APP_VERSION: &str = "1.0.0";

pub struct AuthService {
    verifier: Arc<IdentityVerifier>,
    users: Arc<dyn UserRepository>,
    sessions: Arc<SessionStore>,
    roles: Arc<RoleResolver>,
    csrf: Arc<CsrfTokens>,
    tail: Arc<TailDispatcher>,
    clock: Arc<dyn Clock>,
    legal: LegalConfig,
    timeout: Duration,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: Arc<IdentityVerifier>,
        users: Arc<dyn UserRepository>,
        sessions: Arc<SessionStore>,
        roles: Arc<RoleResolver>,
        csrf: Arc<CsrfTokens>,
        tail: Arc<TailDispatcher>,
        clock: Arc<dyn Clock>,
        legal: LegalConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            users,
            sessions,
            roles,
            csrf,
            tail,
            clock,
            legal,
            timeout,
        }
    }

    fn verify(&self, assertion: &str) -> AuthResult<VerifiedIdentity> {
        self.verifier
            .verify(assertion, self.clock.now())
            .inspect_err(|e| {
                let kind = e.kind();
                lumon_telemetry::metric_inc!(lumon_telemetry::IDENTITY_FAILURES, &[kind.as_str()]);
                lumon_telemetry::log_rejection!(
                    kind.as_str(),
                    "Identity assertion rejected",
                    error = %e
                );
            })
    }

    fn audit(&self, event: AuditEvent) {
        self.tail.dispatch(TailJob::Audit(event));
    }
}

fn metadata(value: serde_json::Value) -> Option<MetadataValue> {
    MetadataValue::from_json(&value, &MetadataLimits::default()).ok()
}

#[async_trait]
impl AuthApi for AuthService {
    async fn auth_init(
        &self,
        assertion: &str,
        app_version: Option<&str>,
        client: &ClientContext,
    ) -> AuthResult<AuthInitOutcome> {
        let identity = self.verify(assertion)?;
        let subject = identity.subject;
        let now = self.clock.now();

        let profile = UserProfile {
            subject,
            first_name: identity.first_name,
            last_name: identity.last_name,
            username: identity.username.clone(),
            language_code: identity.language_code,
            is_premium: identity.is_premium,
            photo_url: identity.photo_url,
            app_version: Some(app_version.unwrap_or(DEFAULT_APP_VERSION).to_string()),
            last_login_at: now,
            legal_accepted_at: None,
            legal_version: None,
        };
        let stored = with_deadline(
            self.timeout,
            "user.upsert_login",
            self.users.upsert_login(profile),
        )
        .await?;

        if self.legal.require_acceptance && stored.legal_accepted_at.is_none() {
            lumon_telemetry::log_rejection!(
                "legal_not_accepted",
                "Login refused until legal documents are accepted",
                subject = %subject
            );
            return Err(AuthError::Forbidden("Legal documents not accepted".into()));
        }

        let binding = self.roles.resolve(subject).await?;
        let (secret, session) = self.sessions.create(subject, binding.tenant_id).await?;

        let mut event = AuditEvent::new(subject, "auth.login", client, now)
            .with_resource("session", session.id.to_string());
        if let Some(meta) = metadata(serde_json::json!({
            "telegram_id": subject.0,
            "username": identity.username,
            "role": binding.role.as_str(),
        })) {
            event = event.with_metadata(meta);
        }
        self.audit(event);

        tracing::info!(subject = %subject, role = %binding.role, "User authenticated");
        Ok(AuthInitOutcome {
            session_secret: secret,
            session_id: session.id,
            subject,
            role: binding.role,
            tenant_id: binding.tenant_id,
            expires_at: session.expires_at,
        })
    }

    async fn validate(&self, secret: &str) -> AuthResult<Principal> {
        let session = self.sessions.validate(secret).await?;
        self.roles.resolve_for_session(&session).await
    }

    async fn refresh(&self, secret: &str) -> AuthResult<RefreshOutcome> {
        let session = self.sessions.refresh(secret).await?;
        let principal = self.roles.resolve_for_session(&session).await?;
        Ok(RefreshOutcome {
            principal,
            expires_at: session.expires_at,
        })
    }

    async fn logout(&self, secret: &str, client: &ClientContext) -> AuthResult<()> {
        if let Some(session) = self.sessions.revoke(secret).await? {
            self.audit(
                AuditEvent::new(session.subject, "auth.logout", client, self.clock.now())
                    .with_resource("session", session.id.to_string()),
            );
        }
        Ok(())
    }

    async fn csrf_token(&self, secret: &str) -> AuthResult<CsrfToken> {
        let session = self.sessions.validate(secret).await?;
        self.csrf.issue(&session.id.to_string(), self.clock.now())
    }

    async fn accept_legal(
        &self,
        assertion: &str,
        version: Option<&str>,
        client: &ClientContext,
    ) -> AuthResult<UserProfile> {
        let identity = self.verify(assertion)?;
        let subject = identity.subject;
        let version = version.unwrap_or(&self.legal.current_version);
        let now = self.clock.now();

        let accepted = with_deadline(
            self.timeout,
            "user.accept_legal",
            self.users.accept_legal(subject, version, now),
        )
        .await?;
        if !accepted {
            return Err(AuthError::NotFound("User"));
        }
        let profile = with_deadline(self.timeout, "user.find", self.users.find(subject))
            .await?
            .ok_or(AuthError::NotFound("User"))?;

        let mut event = AuditEvent::new(subject, "user.legal_docs.accept", client, now)
            .with_resource("user", subject.to_string());
        if let Some(meta) = metadata(serde_json::json!({ "version": version })) {
            event = event.with_metadata(meta);
        }
        self.audit(event);

        tracing::info!(subject = %subject, version, "Legal documents accepted");
        Ok(profile)
    }
}
