//! # Outbound Ports
//!
//! Traits for the persistence layer, the audit sink and the clock.
//!
//! Every method must be atomic on its own: a caller that drops the future
//! (deadline elapsed) either sees the whole effect or none of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AuditEvent, IdempotencyRecord, Membership, RateLimitWindow, Session, SessionId, StoreError,
    SubjectId, TenantId, TokenDigest, UserProfile,
};

/// Session persistence - outbound port.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert a new session. `Duplicate` if the digest already exists.
    async fn insert(&self, session: Session) -> Result<(), StoreError>;

    /// Active session whose digest matches, expired or not.
    async fn find_active(&self, digest: &TokenDigest) -> Result<Option<Session>, StoreError>;

    /// Update `last_activity_at`.
    async fn touch(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Set a new expiry on an active session. `false` if it is no longer active.
    async fn extend(
        &self,
        id: SessionId,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Mark inactive. Returns the session if this call flipped it.
    async fn deactivate(&self, digest: &TokenDigest) -> Result<Option<Session>, StoreError>;
}

/// Membership persistence - outbound port.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Active membership with the earliest `created_at`.
    async fn earliest_active(&self, subject: SubjectId) -> Result<Option<Membership>, StoreError>;

    /// Active membership in a specific tenant.
    async fn active_in(
        &self,
        subject: SubjectId,
        tenant: TenantId,
    ) -> Result<Option<Membership>, StoreError>;

    /// Insert or replace on (subject, tenant).
    async fn upsert(&self, membership: Membership) -> Result<(), StoreError>;
}

/// User profile persistence - outbound port.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, subject: SubjectId) -> Result<Option<UserProfile>, StoreError>;

    /// Insert or update the login fields. Legal acceptance fields of an
    /// existing row are preserved. Returns the stored row.
    async fn upsert_login(&self, profile: UserProfile) -> Result<UserProfile, StoreError>;

    /// Stamp legal acceptance. `false` if the user does not exist.
    async fn accept_legal(
        &self,
        subject: SubjectId,
        version: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Outcome of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Increment {
    /// Counted; holds the new count.
    Counted(u32),
    /// Count already at the ceiling; nothing changed.
    AtCeiling,
    /// The window was replaced concurrently.
    WindowGone,
}

/// Rate limit window persistence - outbound port.
///
/// Coordination happens only through these primitives, never through a
/// read-modify-write in the caller.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn current_window(
        &self,
        subject: SubjectId,
        endpoint: &str,
    ) -> Result<Option<RateLimitWindow>, StoreError>;

    /// Start a window with count 1, compare-and-swap style.
    ///
    /// `superseded` is the `window_start` the caller saw (`None` for no row).
    /// Returns `false` without writing if the row changed since.
    async fn start_window(
        &self,
        subject: SubjectId,
        endpoint: &str,
        superseded: Option<DateTime<Utc>>,
        start: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Atomically add 1 if the row still has `window_start` and its count
    /// is below `ceiling`.
    async fn increment_below(
        &self,
        subject: SubjectId,
        endpoint: &str,
        window_start: DateTime<Utc>,
        ceiling: u32,
    ) -> Result<Increment, StoreError>;
}

/// Idempotency record persistence - outbound port.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find(&self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// `Duplicate` if a live record with the key exists. An expired record
    /// may be replaced.
    async fn insert(&self, record: IdempotencyRecord) -> Result<(), StoreError>;
}

/// Audit trail - outbound port.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError>;
}

/// Time source for testability
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System time implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
