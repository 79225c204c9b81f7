//! # Session Store
//!
//! Lifecycle of session records: create, validate, refresh, revoke.
//!
//! Only the SHA-256 digest of a secret is ever handed to the repository.
//! The plaintext leaves this module exactly once, in the return value of
//! [`SessionStore::create`].

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::tail::{TailDispatcher, TailJob};
use crate::domain::{
    AuthError, Session, SessionConfig, SessionId, SessionSecret, StoreError, SubjectId, TenantId,
};
use crate::ports::{Clock, SessionRepository};
use crate::service::deadline::with_deadline;

/// Collisions on a fresh 256-bit secret are not expected; this bounds the loop anyway.
const CREATE_ATTEMPTS: usize = 3;

/// Session lifecycle manager.
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    tail: Arc<TailDispatcher>,
    config: SessionConfig,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        clock: Arc<dyn Clock>,
        tail: Arc<TailDispatcher>,
        config: SessionConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            tail,
            config,
            timeout,
        }
    }

    /// Issue a session with the configured ttl.
    pub async fn create(
        &self,
        subject: SubjectId,
        tenant_id: Option<TenantId>,
    ) -> Result<(SessionSecret, Session), AuthError> {
        self.create_with_ttl(subject, tenant_id, self.config.ttl).await
    }

    /// Issue a session. Returns the plaintext secret; it is never stored.
    pub async fn create_with_ttl(
        &self,
        subject: SubjectId,
        tenant_id: Option<TenantId>,
        ttl: Duration,
    ) -> Result<(SessionSecret, Session), AuthError> {
        let ttl = to_chrono(ttl)?;

        for _ in 0..CREATE_ATTEMPTS {
            let secret = SessionSecret::generate(self.config.secret_bytes);
            let now = self.clock.now();
            let session = Session {
                id: SessionId::new(),
                secret_digest: secret.digest(),
                subject,
                tenant_id,
                created_at: now,
                expires_at: now + ttl,
                last_activity_at: now,
                is_active: true,
            };

            let insert = with_deadline(self.timeout, "session.insert", async {
                match self.repo.insert(session.clone()).await {
                    Err(StoreError::Duplicate(_)) => Ok(false),
                    other => other.map(|()| true),
                }
            });
            if insert.await? {
                tracing::info!(
                    session_id = %session.id,
                    subject = %subject,
                    expires_at = %session.expires_at,
                    "Session created"
                );
                lumon_telemetry::metric_inc!(lumon_telemetry::SESSIONS_ISSUED);
                return Ok((secret, session));
            }
            tracing::warn!(subject = %subject, "Session digest collision, regenerating");
        }

        Err(AuthError::Storage(
            "could not allocate a unique session secret".into(),
        ))
    }

    /// Look up an active, unexpired session. Stamps activity in the background.
    pub async fn validate(&self, secret: &str) -> Result<Session, AuthError> {
        let session = self.lookup(secret).await?;
        self.tail.dispatch(TailJob::TouchSession {
            id: session.id,
            at: self.clock.now(),
        });
        Ok(session)
    }

    /// Re-validate, then push expiry to `now + ttl`.
    pub async fn refresh(&self, secret: &str) -> Result<Session, AuthError> {
        let mut session = self.lookup(secret).await?;
        let now = self.clock.now();
        let expires_at = now + to_chrono(self.config.ttl)?;

        let extended = with_deadline(
            self.timeout,
            "session.extend",
            self.repo.extend(session.id, expires_at, now),
        )
        .await?;
        if !extended {
            // Revoked between lookup and extend.
            return Err(AuthError::session_not_found());
        }

        session.expires_at = expires_at;
        session.last_activity_at = now;
        tracing::debug!(session_id = %session.id, expires_at = %expires_at, "Session refreshed");
        Ok(session)
    }

    /// Deactivate. Unknown or already revoked secrets are not an error.
    ///
    /// Returns the session if this call revoked it.
    pub async fn revoke(&self, secret: &str) -> Result<Option<Session>, AuthError> {
        let digest = SessionSecret::from_client(secret).digest();
        let revoked =
            with_deadline(self.timeout, "session.deactivate", self.repo.deactivate(&digest)).await?;
        if let Some(session) = &revoked {
            tracing::info!(session_id = %session.id, subject = %session.subject, "Session revoked");
        }
        Ok(revoked)
    }

    /// Remaining lifetime of a session as of now.
    pub fn remaining(&self, session: &Session) -> chrono::Duration {
        session.expires_at - self.clock.now()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn lookup(&self, secret: &str) -> Result<Session, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::session_not_found());
        }
        let digest = SessionSecret::from_client(secret).digest();
        let found =
            with_deadline(self.timeout, "session.find", self.repo.find_active(&digest)).await?;

        let Some(session) = found else {
            lumon_telemetry::metric_inc!(lumon_telemetry::SESSION_VALIDATIONS, &["not_found"]);
            return Err(AuthError::session_not_found());
        };
        if session.is_expired(self.clock.now()) {
            lumon_telemetry::metric_inc!(lumon_telemetry::SESSION_VALIDATIONS, &["expired"]);
            tracing::debug!(session_id = %session.id, "Session expired");
            return Err(AuthError::Expired);
        }
        lumon_telemetry::metric_inc!(lumon_telemetry::SESSION_VALIDATIONS, &["ok"]);
        Ok(session)
    }
}

fn to_chrono(d: Duration) -> Result<chrono::Duration, AuthError> {
    chrono::Duration::from_std(d).map_err(|e| AuthError::Configuration(e.to_string()))
}
