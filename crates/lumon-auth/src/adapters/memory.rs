//! # In-Memory Store
//!
//! Reference adapter implementing every persistence port on `DashMap`.
//! Each port method performs its effect inside a single map entry
//! operation, so it is atomic with respect to concurrent callers and to
//! future cancellation.
//!
//! Failure injection and artificial latency are per-port so tests can
//! break one collaborator while the rest keep working.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::time::Duration;

use crate::domain::{
    AuditEvent, IdempotencyRecord, Membership, RateLimitWindow, Session, SessionId, StoreError,
    SubjectId, TenantId, TokenDigest, UserProfile,
};
use crate::ports::{
    AuditSink, IdempotencyStore, Increment, MembershipRepository, RateLimitStore,
    SessionRepository, UserRepository,
};

/// Port selector for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Sessions,
    SessionTouch,
    Memberships,
    Users,
    RateLimits,
    Idempotency,
    IdempotencyInsert,
    Audit,
}

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub sessions: usize,
    pub idempotency_records: usize,
    pub rate_limit_windows: usize,
}

/// In-memory implementation of all persistence ports.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<SessionId, Session>,
    digest_index: DashMap<TokenDigest, SessionId>,
    memberships: DashMap<(SubjectId, TenantId), Membership>,
    users: DashMap<SubjectId, UserProfile>,
    windows: DashMap<(SubjectId, String), RateLimitWindow>,
    idempotency: DashMap<String, IdempotencyRecord>,
    audit: Mutex<Vec<AuditEvent>>,
    failing: RwLock<HashSet<Port>>,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call on `port` fail with `Unavailable` (or stop doing so).
    pub fn set_failing(&self, port: Port, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(port);
        } else {
            set.remove(&port);
        }
    }

    /// Delay every port call by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Snapshot of recorded audit events.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn idempotency_count(&self) -> usize {
        self.idempotency.len()
    }

    /// Remove expired or inactive sessions, expired idempotency records and
    /// rate limit windows started before `now - window_retention`.
    ///
    /// Nothing schedules this; it is the hook for an external cleanup job.
    pub fn purge_expired(&self, now: DateTime<Utc>, window_retention: Duration) -> PurgeReport {
        let mut report = PurgeReport::default();

        let dead: Vec<(SessionId, TokenDigest)> = self
            .sessions
            .iter()
            .filter(|s| !s.is_active || s.is_expired(now))
            .map(|s| (s.id, s.secret_digest.clone()))
            .collect();
        for (id, digest) in dead {
            self.digest_index.remove(&digest);
            if self.sessions.remove(&id).is_some() {
                report.sessions += 1;
            }
        }

        let before = self.idempotency.len();
        self.idempotency.retain(|_, r| r.is_live(now));
        report.idempotency_records = before - self.idempotency.len();

        let retention = chrono::Duration::from_std(window_retention)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = now - retention;
        let before = self.windows.len();
        self.windows.retain(|_, w| w.window_start >= cutoff);
        report.rate_limit_windows = before - self.windows.len();

        if report != PurgeReport::default() {
            tracing::debug!(?report, "Purged expired rows");
        }
        report
    }

    async fn io(&self, port: Port) -> Result<(), StoreError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.read().contains(&port) {
            return Err(StoreError::Unavailable(format!("{port:?} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        self.io(Port::Sessions).await?;
        match self.digest_index.entry(session.secret_digest.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("session digest".into())),
            Entry::Vacant(slot) => {
                self.sessions.insert(session.id, session.clone());
                slot.insert(session.id);
                Ok(())
            }
        }
    }

    async fn find_active(&self, digest: &TokenDigest) -> Result<Option<Session>, StoreError> {
        self.io(Port::Sessions).await?;
        let Some(id) = self.digest_index.get(digest).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self
            .sessions
            .get(&id)
            .filter(|s| s.is_active)
            .map(|s| s.clone()))
    }

    async fn touch(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.io(Port::SessionTouch).await?;
        if let Some(mut session) = self.sessions.get_mut(&id) {
            if at > session.last_activity_at {
                session.last_activity_at = at;
            }
        }
        Ok(())
    }

    async fn extend(
        &self,
        id: SessionId,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.io(Port::Sessions).await?;
        match self.sessions.get_mut(&id) {
            Some(mut session) if session.is_active => {
                session.expires_at = expires_at;
                session.last_activity_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn deactivate(&self, digest: &TokenDigest) -> Result<Option<Session>, StoreError> {
        self.io(Port::Sessions).await?;
        let Some(id) = self.digest_index.get(digest).map(|r| *r) else {
            return Ok(None);
        };
        match self.sessions.get_mut(&id) {
            Some(mut session) if session.is_active => {
                session.is_active = false;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl MembershipRepository for InMemoryStore {
    async fn earliest_active(&self, subject: SubjectId) -> Result<Option<Membership>, StoreError> {
        self.io(Port::Memberships).await?;
        Ok(self
            .memberships
            .iter()
            .filter(|m| m.subject == subject && m.is_active)
            .min_by_key(|m| m.created_at)
            .map(|m| m.clone()))
    }

    async fn active_in(
        &self,
        subject: SubjectId,
        tenant: TenantId,
    ) -> Result<Option<Membership>, StoreError> {
        self.io(Port::Memberships).await?;
        Ok(self
            .memberships
            .get(&(subject, tenant))
            .filter(|m| m.is_active)
            .map(|m| m.clone()))
    }

    async fn upsert(&self, membership: Membership) -> Result<(), StoreError> {
        self.io(Port::Memberships).await?;
        self.memberships
            .insert((membership.subject, membership.tenant_id), membership);
        Ok(())
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find(&self, subject: SubjectId) -> Result<Option<UserProfile>, StoreError> {
        self.io(Port::Users).await?;
        Ok(self.users.get(&subject).map(|u| u.clone()))
    }

    async fn upsert_login(&self, profile: UserProfile) -> Result<UserProfile, StoreError> {
        self.io(Port::Users).await?;
        let stored = match self.users.entry(profile.subject) {
            Entry::Occupied(mut existing) => {
                let row = existing.get_mut();
                let legal_accepted_at = row.legal_accepted_at;
                let legal_version = row.legal_version.take();
                *row = UserProfile {
                    legal_accepted_at,
                    legal_version,
                    ..profile
                };
                row.clone()
            }
            Entry::Vacant(slot) => slot.insert(profile).clone(),
        };
        Ok(stored)
    }

    async fn accept_legal(
        &self,
        subject: SubjectId,
        version: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.io(Port::Users).await?;
        match self.users.get_mut(&subject) {
            Some(mut user) => {
                user.legal_accepted_at = Some(at);
                user.legal_version = Some(version.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn current_window(
        &self,
        subject: SubjectId,
        endpoint: &str,
    ) -> Result<Option<RateLimitWindow>, StoreError> {
        self.io(Port::RateLimits).await?;
        Ok(self
            .windows
            .get(&(subject, endpoint.to_string()))
            .map(|w| w.clone()))
    }

    async fn start_window(
        &self,
        subject: SubjectId,
        endpoint: &str,
        superseded: Option<DateTime<Utc>>,
        start: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.io(Port::RateLimits).await?;
        let fresh = RateLimitWindow {
            subject,
            endpoint: endpoint.to_string(),
            window_start: start,
            request_count: 1,
        };
        match self.windows.entry((subject, endpoint.to_string())) {
            Entry::Vacant(slot) if superseded.is_none() => {
                slot.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(mut row) if Some(row.get().window_start) == superseded => {
                row.insert(fresh);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_below(
        &self,
        subject: SubjectId,
        endpoint: &str,
        window_start: DateTime<Utc>,
        ceiling: u32,
    ) -> Result<Increment, StoreError> {
        self.io(Port::RateLimits).await?;
        let Some(mut row) = self.windows.get_mut(&(subject, endpoint.to_string())) else {
            return Ok(Increment::WindowGone);
        };
        if row.window_start != window_start {
            return Ok(Increment::WindowGone);
        }
        if row.request_count >= ceiling {
            return Ok(Increment::AtCeiling);
        }
        row.request_count += 1;
        Ok(Increment::Counted(row.request_count))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        self.io(Port::Idempotency).await?;
        Ok(self.idempotency.get(key).map(|r| r.clone()))
    }

    async fn insert(&self, record: IdempotencyRecord) -> Result<(), StoreError> {
        self.io(Port::IdempotencyInsert).await?;
        match self.idempotency.entry(record.key.clone()) {
            Entry::Occupied(existing) if existing.get().is_live(record.created_at) => {
                Err(StoreError::Duplicate(format!("idempotency key {}", record.key)))
            }
            Entry::Occupied(mut expired) => {
                expired.insert(record);
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.io(Port::Audit).await?;
        self.audit.lock().push(event);
        Ok(())
    }
}
