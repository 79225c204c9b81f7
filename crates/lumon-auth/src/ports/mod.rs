//! Ports for the auth core
//!
//! Inbound: the API the transport layer drives.
//! Outbound: persistence, audit and time.

pub mod inbound;
pub mod outbound;

pub use inbound::{AuthApi, AuthInitOutcome, RefreshOutcome};
pub use outbound::{
    AuditSink, Clock, IdempotencyStore, Increment, MembershipRepository, RateLimitStore,
    SessionRepository, SystemClock, UserRepository,
};
