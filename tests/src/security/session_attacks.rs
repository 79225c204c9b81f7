//! # Session Attacks
//!
//! Guessed secrets, reuse after logout, concurrent revocation and digest
//! comparison timing.

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use lumon_auth::domain::{constant_time_compare, hash_secret, verify_secret};
    use lumon_auth::{AuthApi, AuthError, ClientContext};
    use rand::Rng;

    use crate::harness::Harness;

    #[tokio::test]
    async fn test_guessed_secrets_never_validate() {
        let h = Harness::new();
        let real = h.login(1).await;
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let guess: String = (0..real.len())
                .map(|_| char::from(b"0123456789abcdef"[rng.gen_range(0..16)]))
                .collect();
            assert_eq!(
                h.core.auth.validate(&guess).await.unwrap_err(),
                AuthError::session_not_found()
            );
        }
    }

    #[tokio::test]
    async fn test_digest_is_not_a_credential() {
        let h = Harness::new();
        let secret = h.login(1).await;
        let digest = hash_secret(&secret);

        assert!(h.core.auth.validate(digest.as_str()).await.is_err());
        assert!(verify_secret(&secret, &digest));
        assert!(!verify_secret(digest.as_str(), &digest));
    }

    #[tokio::test]
    async fn test_secret_with_edited_suffix_is_rejected() {
        let h = Harness::new();
        let secret = h.login(1).await;
        let mut edited = secret.clone();
        let last = edited.pop().unwrap();
        edited.push(if last == '0' { '1' } else { '0' });

        assert!(h.core.auth.validate(&secret).await.is_ok());
        assert!(h.core.auth.validate(&edited).await.is_err());
        assert!(h.core.auth.validate("").await.is_err());
    }

    #[tokio::test]
    async fn test_logout_then_reuse() {
        let h = Harness::new();
        let secret = h.login(1).await;
        let other = h.login(1).await;

        h.core.auth.logout(&secret, &ClientContext::default()).await.unwrap();
        assert!(h.core.auth.validate(&secret).await.is_err());
        assert!(h.core.auth.csrf_token(&secret).await.is_err());
        // Sibling sessions of the same subject are untouched.
        assert!(h.core.auth.validate(&other).await.is_ok());

        // Repeated logout is not an error.
        h.core.auth.logout(&secret, &ClientContext::default()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_revocations_revoke_once() {
        let h = Harness::new();
        let secret = h.login(1).await;

        let revokes = (0..8).map(|_| h.core.sessions.revoke(&secret));
        let outcomes = futures::future::join_all(revokes).await;

        let revoked = outcomes
            .into_iter()
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();
        assert_eq!(revoked, 1);
        assert!(h.core.auth.validate(&secret).await.is_err());
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let h = Harness::new();
        let secret = h.login(1).await;
        h.store.set_failing(lumon_auth::Port::Sessions, true);

        let err = h.core.auth.validate(&secret).await.unwrap_err();
        assert!(err.kind().is_internal(), "{err:?}");
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let h = Harness::new();
        let secret = h.login(1).await;
        h.store.set_latency(Some(Duration::from_secs(2)));

        assert_eq!(
            h.core.auth.validate(&secret).await.unwrap_err().kind(),
            lumon_auth::ErrorKind::Timeout
        );
    }

    /// Loose sanity bound; catches an early-exit comparison, not
    /// nanosecond leaks.
    #[test]
    fn test_compare_time_does_not_track_prefix() {
        let stored = hash_secret("reference").as_str().to_string();
        let mut near = stored.clone();
        near.replace_range(63.., if stored.ends_with('0') { "1" } else { "0" });
        let far = format!("{}{}", if stored.starts_with('0') { "1" } else { "0" }, &stored[1..]);

        let time = |candidate: &str| {
            let start = Instant::now();
            for _ in 0..20_000 {
                std::hint::black_box(constant_time_compare(
                    std::hint::black_box(candidate),
                    std::hint::black_box(&stored),
                ));
            }
            start.elapsed()
        };

        // Warm up.
        time(&near);
        let near_t = time(&near).as_secs_f64();
        let far_t = time(&far).as_secs_f64();
        let ratio = near_t.max(far_t) / near_t.min(far_t).max(f64::EPSILON);
        assert!(ratio < 5.0, "near {near_t}s far {far_t}s");
    }
}
