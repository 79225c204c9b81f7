//! # Role Resolver
//!
//! Derives the effective role and tenant from membership records on every
//! call. Sessions never carry a role; a role change or a removed
//! membership takes effect on the caller's next request.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{AuthError, Principal, Role, RoleBinding, Session, SubjectId, TenantAccess};
use crate::ports::MembershipRepository;
use crate::service::deadline::with_deadline;

pub struct RoleResolver {
    memberships: Arc<dyn MembershipRepository>,
    timeout: Duration,
}

impl RoleResolver {
    pub fn new(memberships: Arc<dyn MembershipRepository>, timeout: Duration) -> Self {
        Self {
            memberships,
            timeout,
        }
    }

    /// Earliest-created active membership, or viewer with no tenant.
    pub async fn resolve(&self, subject: SubjectId) -> Result<RoleBinding, AuthError> {
        let earliest = with_deadline(
            self.timeout,
            "membership.earliest_active",
            self.memberships.earliest_active(subject),
        )
        .await?;

        Ok(earliest.map_or_else(RoleBinding::default_viewer, |m| RoleBinding {
            role: m.role,
            tenant_id: Some(m.tenant_id),
        }))
    }

    /// Resolve for a validated session.
    ///
    /// A session pinned to a tenant only keeps that tenant while the subject
    /// still holds an active membership there. Otherwise the tenant is
    /// marked revoked, the role drops to viewer and tenant-scoped
    /// operations fail closed.
    pub async fn resolve_for_session(&self, session: &Session) -> Result<Principal, AuthError> {
        let (role, tenant) = match session.tenant_id {
            Some(pinned) => {
                let membership = with_deadline(
                    self.timeout,
                    "membership.active_in",
                    self.memberships.active_in(session.subject, pinned),
                )
                .await?;
                match membership {
                    Some(m) => (m.role, TenantAccess::Member(pinned)),
                    None => {
                        lumon_telemetry::log_rejection!(
                            "tenant_revoked",
                            "Session tenant has no active membership; failing closed",
                            subject = %session.subject,
                            tenant = %pinned
                        );
                        (Role::Viewer, TenantAccess::Revoked(pinned))
                    }
                }
            }
            None => {
                let binding = self.resolve(session.subject).await?;
                let tenant = binding
                    .tenant_id
                    .map_or(TenantAccess::Unbound, TenantAccess::Member);
                (binding.role, tenant)
            }
        };

        Ok(Principal {
            session_id: session.id,
            subject: session.subject,
            role,
            tenant,
        })
    }
}
