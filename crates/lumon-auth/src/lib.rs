//! Lumon Auth - authentication and session integrity core for the Lumon
//! Telegram mini-app backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        lumon-auth                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  http/      axum routes ── OriginLayer ── envelopes             │
//! │     │                                                            │
//! │  ports/inbound  AuthApi                                          │
//! │     │                                                            │
//! │  service/   AuthService      RequestGate                         │
//! │             SessionStore ─ RoleResolver ─ RateLimiter            │
//! │             IdempotencyCache                                     │
//! │     │                                                            │
//! │  ports/outbound  SessionRepository  MembershipRepository ...     │
//! │     │                                                            │
//! │  adapters/  InMemoryStore   TailDispatcher   ManualClock         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `domain/` holds the pure parts: identity assertion verification,
//! secret hashing, CSRF tokens, bounded metadata values, configuration
//! and the error taxonomy.
//!
//! # Security
//!
//! - Only SHA-256 digests of session secrets are stored
//! - Roles are resolved from memberships on every request, never cached
//! - A session pinned to a tenant the subject left fails closed
//! - Rate limit increments are atomic conditional adds in the store
//! - Secrets are zeroized and print as `***`
//!
//! # Usage
//!
//! ```ignore
//! use lumon_auth::{AuthConfig, AuthCore, AuthPorts, InMemoryStore, SystemClock};
//!
//! let config = AuthConfig::from_env()?;
//! let store = Arc::new(InMemoryStore::new());
//! let core = Arc::new(AuthCore::new(config, AuthPorts::in_memory(store), Arc::new(SystemClock))?);
//! let app = lumon_auth::http::router(core.clone());
//! ```

pub mod adapters;
pub mod domain;
pub mod http;
pub mod ports;
pub mod service;

pub use adapters::{InMemoryStore, ManualClock, Port, PurgeReport, TailDispatcher, TailJob};
pub use domain::{
    sign_assertion, ApiErrorBody, ApiResponse, AuthConfig, AuthError, AuthResult, ClientContext,
    ConfigError, Environment, ErrorKind, IdentityVerifier, Principal, Role, SubjectId,
    TenantAccess, TenantId,
};
pub use ports::{AuthApi, AuthInitOutcome, Clock, RefreshOutcome, SystemClock};
pub use service::{
    AuthCore, AuthPorts, GuardedAction, GuardedRequest, GuardedResponse, RequestGate,
};
