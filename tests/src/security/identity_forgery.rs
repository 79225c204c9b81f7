//! # Identity Forgery
//!
//! Tampered, replayed, unsigned and oversized identity assertions.

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use std::time::Duration;

    use lumon_auth::domain::{SecretString, MAX_ASSERTION_LEN};
    use lumon_auth::{AuthApi, AuthError, ClientContext, Environment, IdentityVerifier};
    use proptest::prelude::*;

    use crate::harness::{signed_assertion, Harness, BOT_TOKEN};

    fn fresh(id: i64) -> String {
        signed_assertion(id, Utc::now().timestamp())
    }

    fn verifier() -> IdentityVerifier {
        IdentityVerifier::new(
            Some(SecretString::new(BOT_TOKEN)),
            Environment::Production,
            Duration::from_secs(3600),
        )
        .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Replacing any single byte before the hash always invalidates the
        /// assertion.
        #[test]
        fn test_single_byte_tamper_is_rejected(position in 0usize..512, replacement in b'0'..=b'9') {
            let raw = fresh(42);
            let hash_at = raw.find("&hash=").unwrap();
            let index = position % hash_at;
            prop_assume!(raw.as_bytes()[index] != replacement);

            let mut bytes = raw.into_bytes();
            bytes[index] = replacement;
            let tampered = String::from_utf8(bytes).unwrap();

            let result = verifier().verify(&tampered, Utc::now());
            prop_assert!(
                matches!(
                    result,
                    Err(AuthError::SignatureMismatch | AuthError::MalformedInput(_))
                ),
                "accepted tampered byte {} in {}",
                index,
                tampered
            );
        }
    }

    #[test]
    fn test_rewritten_subject_fails_signature() {
        let raw = fresh(42);
        let forged = raw.replace("%22id%22%3A42", "%22id%22%3A1");
        assert_ne!(raw, forged);
        assert_eq!(
            verifier().verify(&forged, Utc::now()).unwrap_err(),
            AuthError::SignatureMismatch
        );
    }

    #[test]
    fn test_hash_from_other_bot_is_rejected() {
        let foreign = lumon_auth::sign_assertion(
            "another-bot",
            &[
                ("auth_date", &Utc::now().timestamp().to_string()),
                ("user", r#"{"id":42}"#),
            ],
        )
        .unwrap();
        assert_eq!(
            verifier().verify(&foreign, Utc::now()).unwrap_err(),
            AuthError::SignatureMismatch
        );
    }

    #[test]
    fn test_missing_hash_is_rejected() {
        let raw = fresh(42);
        let unsigned = &raw[..raw.find("&hash=").unwrap()];
        assert_eq!(
            verifier().verify(unsigned, Utc::now()).unwrap_err(),
            AuthError::SignatureMismatch
        );
    }

    #[test]
    fn test_replayed_assertion_goes_stale() {
        let now = Utc::now();
        let old = signed_assertion(42, now.timestamp() - 3601);
        assert!(matches!(
            verifier().verify(&old, now),
            Err(AuthError::StaleAssertion { max_age_secs: 3600, .. })
        ));

        let edge = signed_assertion(42, now.timestamp() - 3600);
        assert!(verifier().verify(&edge, now).is_ok());
    }

    #[tokio::test]
    async fn test_stale_assertion_creates_no_session() {
        let h = Harness::new();
        let raw = h.assertion(42);
        h.clock.advance(Duration::from_secs(3601));

        let err = h
            .core
            .auth
            .auth_init(&raw, None, &ClientContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StaleAssertion { .. }));
        assert_eq!(h.store.session_count(), 0);
    }

    #[test]
    fn test_oversized_assertion_is_malformed() {
        let padded = format!("{}&pad={}", fresh(42), "x".repeat(MAX_ASSERTION_LEN));
        assert!(matches!(
            verifier().verify(&padded, Utc::now()),
            Err(AuthError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_deeply_nested_user_is_rejected() {
        let nested = format!(r#"{{"id":42,"x":{}1{}}}"#, "[".repeat(64), "]".repeat(64));
        let raw = lumon_auth::sign_assertion(
            BOT_TOKEN,
            &[
                ("auth_date", &Utc::now().timestamp().to_string()),
                ("user", &nested),
            ],
        )
        .unwrap();
        assert!(verifier().verify(&raw, Utc::now()).is_err());
    }

    #[test]
    fn test_unverified_mode_refused_in_production() {
        let open = IdentityVerifier::new(None, Environment::Production, Duration::from_secs(3600))
            .unwrap();
        assert!(matches!(
            open.verify(&fresh(42), Utc::now()),
            Err(AuthError::Configuration(_))
        ));
    }
}
