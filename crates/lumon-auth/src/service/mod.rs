//! # Services
//!
//! Request-path logic over the outbound ports, plus [`AuthCore`], the
//! composition root that wires configuration, ports and clock together.

pub mod auth;
pub(crate) mod deadline;
pub mod gate;
pub mod idempotency;
pub mod rate_limiter;
pub mod role_resolver;
pub mod session_store;

pub use auth::AuthService;
pub use gate::{GuardedAction, GuardedRequest, GuardedResponse, RequestGate};
pub use idempotency::IdempotencyCache;
pub use rate_limiter::{RateDecision, RateLimiter};
pub use role_resolver::RoleResolver;
pub use session_store::SessionStore;

use std::sync::Arc;

use crate::adapters::{InMemoryStore, TailDispatcher, TailTargets};
use crate::domain::{AuthConfig, AuthError, CsrfTokens, IdentityVerifier};
use crate::ports::{
    AuditSink, Clock, IdempotencyStore, MembershipRepository, RateLimitStore, SessionRepository,
    UserRepository,
};

/// The outbound ports the core depends on.
#[derive(Clone)]
pub struct AuthPorts {
    pub sessions: Arc<dyn SessionRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub users: Arc<dyn UserRepository>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl AuthPorts {
    /// Every port backed by one in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            sessions: store.clone(),
            memberships: store.clone(),
            users: store.clone(),
            rate_limits: store.clone(),
            idempotency: store.clone(),
            audit: store,
        }
    }
}

/// Fully wired auth core.
pub struct AuthCore {
    pub config: Arc<AuthConfig>,
    pub auth: Arc<AuthService>,
    pub gate: Arc<RequestGate>,
    pub sessions: Arc<SessionStore>,
    pub roles: Arc<RoleResolver>,
    pub rate_limiter: Arc<RateLimiter>,
    pub idempotency: Arc<IdempotencyCache>,
    pub csrf: Arc<CsrfTokens>,
    pub tail: Arc<TailDispatcher>,
    pub clock: Arc<dyn Clock>,
}

impl AuthCore {
    /// Validate `config` and build every service.
    ///
    /// Must run inside a tokio runtime: the tail worker is spawned here.
    pub fn new(config: AuthConfig, ports: AuthPorts, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        config
            .validate()
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        let timeout = config.store.timeout;

        let tail = TailDispatcher::spawn(TailTargets {
            sessions: ports.sessions.clone(),
            audit: ports.audit.clone(),
            timeout,
        });

        let verifier = Arc::new(IdentityVerifier::new(
            config.identity.bot_token.clone(),
            config.environment,
            config.identity.max_assertion_age,
        )?);
        let csrf = Arc::new(CsrfTokens::new(
            config.csrf.secret_key.clone(),
            config.environment,
            config.csrf.token_lifetime,
        )?);

        let sessions = Arc::new(SessionStore::new(
            ports.sessions,
            clock.clone(),
            tail.clone(),
            config.session.clone(),
            timeout,
        ));
        let roles = Arc::new(RoleResolver::new(ports.memberships, timeout));
        let rate_limiter = Arc::new(RateLimiter::new(
            ports.rate_limits,
            clock.clone(),
            config.rate_limits.clone(),
            timeout,
        ));
        let idempotency = Arc::new(IdempotencyCache::new(
            ports.idempotency,
            clock.clone(),
            config.idempotency.clone(),
            timeout,
        ));

        let auth = Arc::new(AuthService::new(
            verifier,
            ports.users,
            sessions.clone(),
            roles.clone(),
            csrf.clone(),
            tail.clone(),
            clock.clone(),
            config.legal.clone(),
            timeout,
        ));
        let gate = Arc::new(RequestGate::new(
            sessions.clone(),
            roles.clone(),
            rate_limiter.clone(),
            idempotency.clone(),
            csrf.clone(),
            tail.clone(),
            clock.clone(),
        ));

        tracing::info!(
            environment = ?config.environment,
            endpoints = config.rate_limits.endpoints.len(),
            "Auth core initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            auth,
            gate,
            sessions,
            roles,
            rate_limiter,
            idempotency,
            csrf,
            tail,
            clock,
        })
    }

    /// Drain pending tail jobs and stop the worker.
    pub async fn shutdown(&self) {
        self.tail.flush().await;
        self.tail.shutdown().await;
        tracing::info!("Auth core stopped");
    }
}
