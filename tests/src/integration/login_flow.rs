//! # Login Flow
//!
//! Identity assertion → profile upsert → role resolution → session →
//! validate / refresh / logout, with roles re-resolved on every call.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lumon_auth::ports::UserRepository;
    use lumon_auth::{
        AuthApi, AuthError, ClientContext, Clock, Role, SubjectId, TenantAccess, TenantId,
    };

    use crate::harness::Harness;

    fn client() -> ClientContext {
        ClientContext {
            ip: Some("203.0.113.7".into()),
            user_agent: Some("TelegramBot (like TwitterBot)".into()),
        }
    }

    #[tokio::test]
    async fn test_first_login_is_viewer_without_tenant() {
        let h = Harness::new();
        let outcome = h
            .core
            .auth
            .auth_init(&h.assertion(42), Some("3.2.0"), &client())
            .await
            .unwrap();

        assert_eq!(outcome.subject, SubjectId(42));
        assert_eq!(outcome.role, Role::Viewer);
        assert_eq!(outcome.tenant_id, None);
        assert_eq!(
            outcome.expires_at,
            h.clock.now() + chrono::Duration::days(7)
        );

        let principal = h
            .core
            .auth
            .validate(outcome.session_secret.expose())
            .await
            .unwrap();
        assert_eq!(principal.subject, SubjectId(42));

        h.flush().await;
        let login = &h.store.audit_events()[0];
        assert_eq!(login.action, "auth.login");
        assert_eq!(login.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(login.resource_type.as_deref(), Some("session"));

        let profile = h.store.find(SubjectId(42)).await.unwrap().unwrap();
        assert_eq!(profile.username, "user42");
        assert_eq!(profile.app_version.as_deref(), Some("3.2.0"));
    }

    #[tokio::test]
    async fn test_role_granted_after_session_creation_applies() {
        let h = Harness::new();
        let secret = h.login(42).await;

        let t1 = TenantId::new();
        h.grant(42, t1, Role::Owner).await;

        let principal = h.core.auth.validate(&secret).await.unwrap();
        assert_eq!(principal.role, Role::Owner);
        assert_eq!(principal.tenant, TenantAccess::Member(t1));
    }

    #[tokio::test]
    async fn test_login_pins_earliest_membership() {
        let h = Harness::new();
        let (t1, t2) = (TenantId::new(), TenantId::new());
        h.grant(7, t1, Role::Manager).await;
        h.clock.advance(Duration::from_secs(5));
        h.grant(7, t2, Role::Owner).await;

        let outcome = h
            .core
            .auth
            .auth_init(&h.assertion(7), None, &client())
            .await
            .unwrap();
        assert_eq!(outcome.role, Role::Manager);
        assert_eq!(outcome.tenant_id, Some(t1));
    }

    #[tokio::test]
    async fn test_refresh_extends_and_logout_revokes() {
        let h = Harness::new();
        let secret = h.login(1).await;

        h.clock.advance(Duration::from_secs(6 * 86_400));
        let refreshed = h.core.auth.refresh(&secret).await.unwrap();
        assert_eq!(
            refreshed.expires_at,
            h.clock.now() + chrono::Duration::days(7)
        );

        // Past the original expiry, still valid thanks to the refresh.
        h.clock.advance(Duration::from_secs(2 * 86_400));
        assert!(h.core.auth.validate(&secret).await.is_ok());

        h.core.auth.logout(&secret, &client()).await.unwrap();
        assert_eq!(
            h.core.auth.validate(&secret).await.unwrap_err(),
            AuthError::session_not_found()
        );
        assert_eq!(
            h.core.auth.refresh(&secret).await.unwrap_err(),
            AuthError::session_not_found()
        );
    }

    #[tokio::test]
    async fn test_session_expires_without_refresh() {
        let h = Harness::new();
        let secret = h.login(1).await;
        h.clock.advance(Duration::from_secs(7 * 86_400));
        assert_eq!(
            h.core.auth.validate(&secret).await.unwrap_err(),
            AuthError::Expired
        );
    }

    #[tokio::test]
    async fn test_repeat_login_keeps_legal_acceptance() {
        let mut config = Harness::config();
        config.legal.require_acceptance = true;
        let h = Harness::with_config(config);
        let raw = h.assertion(5);

        assert!(matches!(
            h.core.auth.auth_init(&raw, None, &client()).await,
            Err(AuthError::Forbidden(_))
        ));
        h.core
            .auth
            .accept_legal(&raw, Some("2.0"), &client())
            .await
            .unwrap();

        for _ in 0..2 {
            h.core.auth.auth_init(&raw, None, &client()).await.unwrap();
        }
        let profile = h.store.find(SubjectId(5)).await.unwrap().unwrap();
        assert_eq!(profile.legal_version.as_deref(), Some("2.0"));

        h.flush().await;
        assert!(h
            .store
            .audit_events()
            .iter()
            .any(|e| e.action == "user.legal_docs.accept"));
    }

    #[tokio::test]
    async fn test_csrf_token_bound_to_session() {
        let h = Harness::new();
        let a = h.login(1).await;
        let b = h.login(2).await;

        let token = h.core.auth.csrf_token(&a).await.unwrap();
        let session_a = h.core.sessions.validate(&a).await.unwrap();
        let session_b = h.core.sessions.validate(&b).await.unwrap();

        assert!(h
            .core
            .csrf
            .validate(&token.token, &session_a.id.to_string(), h.clock.now())
            .is_ok());
        assert!(matches!(
            h.core
                .csrf
                .validate(&token.token, &session_b.id.to_string(), h.clock.now()),
            Err(AuthError::Forbidden(_))
        ));
    }
}
