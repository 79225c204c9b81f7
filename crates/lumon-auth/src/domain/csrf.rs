//! # CSRF Tokens
//!
//! Stateless, session-bound tokens for critical writes.
//!
//! Format: `{unix_millis}-{random}-{mac}` where `random` is 16 random bytes
//! in hex and `mac = hex(HMAC_SHA256(key, "{unix_millis}-{random}-{binding}"))`.
//! The binding (session id) is never part of the token itself.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use zeroize::Zeroizing;

use super::config::Environment;
use super::errors::AuthError;
use super::token::{constant_time_compare, SecretString};

type HmacSha256 = Hmac<Sha256>;

/// Issued token plus its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsrfToken {
    pub token: String,
    pub expires_in: u64,
}

/// Issues and validates CSRF tokens.
pub struct CsrfTokens {
    key: Zeroizing<Vec<u8>>,
    lifetime: Duration,
}

impl std::fmt::Debug for CsrfTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfTokens")
            .field("key", &"***")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

impl CsrfTokens {
    /// Without a configured key, development gets a per-process random key.
    pub fn new(
        key: Option<SecretString>,
        environment: Environment,
        lifetime: Duration,
    ) -> Result<Self, AuthError> {
        let key = match key.filter(|k| !k.is_empty()) {
            Some(k) => Zeroizing::new(k.expose().as_bytes().to_vec()),
            None if environment.is_production() => {
                return Err(AuthError::Configuration(
                    "CSRF_SECRET_KEY is required in production".into(),
                ));
            }
            None => {
                tracing::warn!(
                    "CSRF_SECRET_KEY not set: using a random per-process key, tokens die on restart"
                );
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                Zeroizing::new(bytes)
            }
        };
        Ok(Self { key, lifetime })
    }

    pub fn issue(&self, binding: &str, now: DateTime<Utc>) -> Result<CsrfToken, AuthError> {
        let timestamp = now.timestamp_millis().to_string();
        let mut random = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random);
        let random = hex::encode(random);

        let mac = self.mac(&timestamp, &random, binding)?;
        Ok(CsrfToken {
            token: format!("{timestamp}-{random}-{mac}"),
            expires_in: self.lifetime.as_secs(),
        })
    }

    /// Fails with `Forbidden` on any defect.
    pub fn validate(&self, token: &str, binding: &str, now: DateTime<Utc>) -> Result<(), AuthError> {
        if token.is_empty() {
            return Err(AuthError::Forbidden("missing CSRF token".into()));
        }

        let parts: Vec<&str> = token.split('-').collect();
        let [timestamp, random, mac] = parts.as_slice() else {
            return Err(AuthError::Forbidden("invalid CSRF token format".into()));
        };

        let issued_ms: i64 = timestamp
            .parse()
            .map_err(|_| AuthError::Forbidden("CSRF token expired".into()))?;
        let age_ms = now.timestamp_millis() - issued_ms;
        if age_ms < 0 || age_ms > self.lifetime.as_millis() as i64 {
            return Err(AuthError::Forbidden("CSRF token expired".into()));
        }

        let expected = self.mac(timestamp, random, binding)?;
        if !constant_time_compare(mac, &expected) {
            return Err(AuthError::Forbidden("invalid CSRF token signature".into()));
        }
        Ok(())
    }

    fn mac(&self, timestamp: &str, random: &str, binding: &str) -> Result<String, AuthError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| AuthError::Configuration(e.to_string()))?;
        mac.update(format!("{timestamp}-{random}-{binding}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
