//! # Guarded Action Flow
//!
//! A state-changing "chat-create" action behind the request gate: session,
//! role, rate limit, idempotency short-circuit, action, tail.

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    use lumon_auth::{AuthError, GuardedAction, GuardedRequest, Port, Role, TenantId};
    use serde_json::{json, Value};

    use crate::harness::Harness;

    /// Stand-in for the chats table.
    #[derive(Default)]
    struct Chats {
        rows: Mutex<Vec<(i64, String)>>,
    }

    impl Chats {
        fn create(&self, owner: i64, title: &str) -> Value {
            let mut rows = self.rows.lock();
            rows.push((owner, title.to_string()));
            json!({ "id": rows.len(), "title": title, "created_at": chrono::Utc::now() })
        }

        fn count(&self) -> usize {
            self.rows.lock().len()
        }
    }

    fn create_chat() -> GuardedAction {
        GuardedAction::new("chat-create")
    }

    #[tokio::test]
    async fn test_idempotent_retry_is_byte_identical() {
        let h = Harness::new();
        let chats = Arc::new(Chats::default());
        let secret = h.login(42).await;
        let replays_before = lumon_telemetry::IDEMPOTENT_REPLAYS.get();

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let chats = chats.clone();
            let response = h
                .core
                .gate
                .execute_guarded(
                    GuardedRequest::new(&secret).idempotency_key("create-chat-0001"),
                    &create_chat(),
                    move |p| async move { Ok(chats.create(p.subject.0, "Roadmap")) },
                )
                .await
                .unwrap();
            bodies.push(response);
        }
        h.flush().await;

        assert!(!bodies[0].replayed);
        assert!(bodies[1].replayed);
        assert_eq!(bodies[0].body, bodies[1].body);
        assert_eq!(chats.count(), 1);
        assert!(lumon_telemetry::IDEMPOTENT_REPLAYS.get() >= replays_before + 1.0);

        let audits = h
            .store
            .audit_events()
            .into_iter()
            .filter(|e| e.action == "gate.chat-create")
            .count();
        assert_eq!(audits, 1);
    }

    #[tokio::test]
    async fn test_back_to_back_retry_replays_without_flush() {
        let h = Harness::new();
        let chats = Arc::new(Chats::default());
        let secret = h.login(42).await;

        let mut responses = Vec::new();
        for _ in 0..2 {
            let chats = chats.clone();
            responses.push(
                h.core
                    .gate
                    .execute_guarded(
                        GuardedRequest::new(&secret).idempotency_key("k-seq"),
                        &create_chat(),
                        move |p| async move { Ok(chats.create(p.subject.0, "Standup")) },
                    )
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(chats.count(), 1);
        let replayed: Vec<bool> = responses.iter().map(|r| r.replayed).collect();
        assert_eq!(replayed, [false, true]);
        assert_eq!(responses[0].body, responses[1].body);
    }

    #[tokio::test]
    async fn test_distinct_keys_execute_separately() {
        let h = Harness::new();
        let chats = Arc::new(Chats::default());
        let secret = h.login(42).await;

        for key in ["k-a", "k-b"] {
            let chats = chats.clone();
            h.core
                .gate
                .execute_guarded(
                    GuardedRequest::new(&secret).idempotency_key(key),
                    &create_chat(),
                    move |p| async move { Ok(chats.create(p.subject.0, "x")) },
                )
                .await
                .unwrap();
        }
        assert_eq!(chats.count(), 2);
    }

    #[tokio::test]
    async fn test_eleventh_chat_create_is_rate_limited() {
        let h = Harness::new();
        let chats = Arc::new(Chats::default());
        let secret = h.login(42).await;

        let mut outcomes = Vec::new();
        for i in 0..11 {
            let chats = chats.clone();
            outcomes.push(
                h.core
                    .gate
                    .execute_guarded(
                        GuardedRequest::new(&secret),
                        &create_chat(),
                        move |p| async move { Ok(chats.create(p.subject.0, &format!("chat {i}"))) },
                    )
                    .await,
            );
        }

        assert!(outcomes[..10].iter().all(|r| r.is_ok()));
        assert!(matches!(
            outcomes[10],
            Err(AuthError::RateExceeded { ref endpoint, .. }) if endpoint == "chat-create"
        ));
        assert_eq!(chats.count(), 10);

        // A full window later the caller is admitted again.
        h.clock.advance(Duration::from_secs(61));
        let chats2 = chats.clone();
        assert!(h
            .core
            .gate
            .execute_guarded(GuardedRequest::new(&secret), &create_chat(), move |p| async move {
                Ok(chats2.create(p.subject.0, "after"))
            })
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_burst_admits_at_most_ceiling() {
        let h = Harness::new();
        let chats = Arc::new(Chats::default());
        let secret = h.login(42).await;
        let action = create_chat();

        let attempts = (0..20).map(|_| {
            let chats = chats.clone();
            h.core.gate.execute_guarded(
                GuardedRequest::new(&secret),
                &action,
                move |p| async move { Ok(chats.create(p.subject.0, "burst")) },
            )
        });
        let outcomes = futures::future::join_all(attempts).await;

        let admitted = outcomes.iter().filter(|r| r.is_ok()).count();
        let limited = outcomes
            .iter()
            .filter(|r| matches!(r, Err(AuthError::RateExceeded { .. })))
            .count();
        assert!(admitted <= 10, "admitted {admitted}");
        assert_eq!(admitted + limited, 20);
        assert_eq!(chats.count(), admitted);
    }

    #[tokio::test]
    async fn test_tenant_scoped_owner_action() {
        let h = Harness::new();
        let tenant = TenantId::new();
        h.grant(42, tenant, Role::Owner).await;
        let secret = h.login(42).await;

        let delete = GuardedAction::new("chat-delete")
            .roles(&[Role::Owner, Role::Manager])
            .tenant_scoped();

        let response = h
            .core
            .gate
            .execute_guarded(GuardedRequest::new(&secret), &delete, |p| async move {
                Ok(json!({ "tenant": p.require_tenant()? }))
            })
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["tenant"], tenant.to_string());

        // Demoted: the very next request sees it.
        h.grant(42, tenant, Role::Viewer).await;
        let denied = h
            .core
            .gate
            .execute_guarded(GuardedRequest::new(&secret), &delete, |_| async {
                Ok(json!({}))
            })
            .await;
        assert!(matches!(denied, Err(AuthError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_reads_skip_rate_limit() {
        let h = Harness::new();
        let secret = h.login(1).await;
        let list = GuardedAction::new("chat-list");

        for _ in 0..150 {
            let subject = h
                .core
                .gate
                .execute_read(&secret, &list, |p| async move { Ok(p.subject) })
                .await
                .unwrap();
            assert_eq!(subject.0, 1);
        }
    }

    #[tokio::test]
    async fn test_audit_and_idempotency_outage_is_invisible() {
        let h = Harness::new();
        let secret = h.login(1).await;
        h.store.set_failing(Port::Audit, true);
        h.store.set_failing(Port::IdempotencyInsert, true);

        let response = h
            .core
            .gate
            .execute_guarded(
                GuardedRequest::new(&secret).idempotency_key("k"),
                &create_chat(),
                |_| async { Ok(json!({"id": 1})) },
            )
            .await
            .unwrap();
        h.flush().await;
        assert!(!response.replayed);

        // Dedup was lost, the primary effect was not.
        h.store.set_failing(Port::IdempotencyInsert, false);
        let again = h
            .core
            .gate
            .execute_guarded(
                GuardedRequest::new(&secret).idempotency_key("k"),
                &create_chat(),
                |_| async { Ok(json!({"id": 2})) },
            )
            .await
            .unwrap();
        assert!(!again.replayed);
    }
}
