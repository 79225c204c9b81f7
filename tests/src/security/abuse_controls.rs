//! # Abuse Controls
//!
//! Rate-limit evasion, idempotency-key hijacking and cross-site requests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use lumon_auth::http::OriginPolicy;
    use lumon_auth::{AuthError, Clock, GuardedAction, GuardedRequest, Role, TenantId};
    use serde_json::json;

    use crate::harness::Harness;

    #[tokio::test]
    async fn test_unknown_endpoint_falls_back_to_default_ceiling() {
        let h = Harness::new();
        let secret = h.login(3).await;
        let action = GuardedAction::new("totally-new-endpoint");

        let mut admitted = 0;
        for _ in 0..200 {
            match h
                .core
                .gate
                .execute_guarded(GuardedRequest::new(&secret), &action, |_| async {
                    Ok(json!({}))
                })
                .await
            {
                Ok(_) => admitted += 1,
                Err(AuthError::RateExceeded { .. }) => break,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
        let ceiling = h
            .core
            .config
            .rate_limits
            .rule_for("totally-new-endpoint")
            .max_requests;
        assert_eq!(admitted, ceiling as usize);
    }

    #[tokio::test]
    async fn test_second_session_shares_the_subject_budget() {
        let h = Harness::new();
        let first = h.login(3).await;
        let second = h.login(3).await;
        let action = GuardedAction::new("chat-create");

        for i in 0..10 {
            let secret = if i % 2 == 0 { &first } else { &second };
            h.core
                .gate
                .execute_guarded(GuardedRequest::new(secret), &action, |_| async { Ok(1) })
                .await
                .unwrap();
        }
        let third = h.login(3).await;
        assert!(matches!(
            h.core
                .gate
                .execute_guarded(GuardedRequest::new(&third), &action, |_| async { Ok(1) })
                .await,
            Err(AuthError::RateExceeded { .. })
        ));

        // Other subjects are unaffected.
        let bystander = h.login(4).await;
        assert!(h
            .core
            .gate
            .execute_guarded(GuardedRequest::new(&bystander), &action, |_| async { Ok(1) })
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_idempotency_key_of_another_subject_is_refused() {
        let h = Harness::new();
        let victim = h.login(10).await;
        let attacker = h.login(11).await;
        let action = GuardedAction::new("chat-create");
        let runs = AtomicUsize::new(0);
        let runs = &runs;

        let original = h
            .core
            .gate
            .execute_guarded(
                GuardedRequest::new(&victim).idempotency_key("shared-key"),
                &action,
                move |_| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"private": "victim data"}))
                },
            )
            .await
            .unwrap();
        h.flush().await;

        let stolen = h
            .core
            .gate
            .execute_guarded(
                GuardedRequest::new(&attacker).idempotency_key("shared-key"),
                &action,
                move |_| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({}))
                },
            )
            .await;

        assert!(matches!(stolen, Err(AuthError::ValidationFailed(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(original.body.contains("victim data"));
    }

    #[tokio::test]
    async fn test_oversized_idempotency_key_is_rejected_before_action() {
        let h = Harness::new();
        let secret = h.login(1).await;
        let runs = AtomicUsize::new(0);
        let runs = &runs;

        let result = h
            .core
            .gate
            .execute_guarded(
                GuardedRequest::new(&secret).idempotency_key("k".repeat(256)),
                &GuardedAction::new("chat-create"),
                move |_| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;
        assert!(matches!(result, Err(AuthError::ValidationFailed(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_idempotency_record_reexecutes() {
        let h = Harness::new();
        let secret = h.login(1).await;
        let action = GuardedAction::new("chat-create");
        let request = || GuardedRequest::new(&secret).idempotency_key("daily");

        h.core
            .gate
            .execute_guarded(request(), &action, |_| async { Ok(1) })
            .await
            .unwrap();
        h.flush().await;

        h.clock.advance(Duration::from_secs(24 * 3600 + 1));
        let later = h
            .core
            .gate
            .execute_guarded(request(), &action, |_| async { Ok(2) })
            .await
            .unwrap();
        assert!(!later.replayed);
        assert!(later.body.contains('2'));
    }

    #[tokio::test]
    async fn test_csrf_token_from_another_session_is_refused() {
        let h = Harness::new();
        let victim = h.login(20).await;
        let attacker = h.login(21).await;
        let stolen = h.core.csrf.issue("not-the-victim-session", h.clock.now());
        let attacker_token = lumon_auth::AuthApi::csrf_token(&*h.core.auth, &attacker)
            .await
            .unwrap();
        let action = GuardedAction::new("chat-create").with_csrf();

        for token in [stolen.unwrap().token, attacker_token.token] {
            let result = h
                .core
                .gate
                .execute_guarded(
                    GuardedRequest::new(&victim).csrf_token(token),
                    &action,
                    |_| async { Ok(()) },
                )
                .await;
            assert!(matches!(result, Err(AuthError::Forbidden(_))));
        }

        let missing = h
            .core
            .gate
            .execute_guarded(GuardedRequest::new(&victim), &action, |_| async { Ok(()) })
            .await;
        assert!(matches!(missing, Err(AuthError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_role_check_precedes_rate_limit() {
        let h = Harness::new();
        let tenant = TenantId::new();
        h.grant(5, tenant, Role::Viewer).await;
        let secret = h.login(5).await;
        let admin_only = GuardedAction::new("chat-create").roles(&[Role::Owner]);

        for _ in 0..20 {
            assert!(matches!(
                h.core
                    .gate
                    .execute_guarded(GuardedRequest::new(&secret), &admin_only, |_| async {
                        Ok(())
                    })
                    .await,
                Err(AuthError::Unauthorized(_))
            ));
        }
        // Refused attempts did not burn the budget.
        assert!(h
            .core
            .gate
            .execute_guarded(
                GuardedRequest::new(&secret),
                &GuardedAction::new("chat-create"),
                |_| async { Ok(()) }
            )
            .await
            .is_ok());
    }

    #[test]
    fn test_production_origin_policy() {
        let policy = OriginPolicy::new(["https://app.lumon.io"], true);
        assert!(policy.check(Some("https://app.lumon.io"), None).is_ok());
        for origin in [
            "https://app.lumon.io.evil.example",
            "http://app.lumon.io",
            "http://localhost:5173",
            "null",
        ] {
            assert!(policy.check(Some(origin), None).is_err(), "{origin}");
        }
        assert!(policy.check(None, None).is_err());
    }
}
