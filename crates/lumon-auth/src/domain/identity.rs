//! # Identity Verifier
//!
//! Validates Telegram WebApp `initData` assertions.
//!
//! ## Algorithm
//!
//! 1. Split the assertion on `&`, each pair on the first `=`. Pairs with an
//!    empty key or value are ignored.
//! 2. `secret_key = HMAC_SHA256(key = "WebAppData", msg = bot_token)`
//! 3. `data_check_string` = every pair except `hash`, sorted by key,
//!    rendered `key=<percent-decoded value>`, joined by `\n`.
//! 4. `hash` must equal `hex(HMAC_SHA256(secret_key, data_check_string))`.
//! 5. `auth_date` must be no older than the staleness window.
//!
//! Values are percent-decoded exactly once and `+` stays a literal `+`.
//! The platform signs the decoded values, so decoding twice or treating
//! `+` as a space silently breaks verification for some users.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use zeroize::Zeroizing;

use super::config::Environment;
use super::entities::SubjectId;
use super::errors::AuthError;
use super::safe_json::{MetadataLimits, MetadataValue};
use super::token::{constant_time_compare, SecretString};

type HmacSha256 = Hmac<Sha256>;

/// Domain separation string for the secondary key.
pub const WEB_APP_DATA: &[u8] = b"WebAppData";

/// Assertions longer than this are rejected before parsing.
pub const MAX_ASSERTION_LEN: usize = 8 * 1024;

const HASH_FIELD: &str = "hash";
const USER_FIELD: &str = "user";
const AUTH_DATE_FIELD: &str = "auth_date";
const DEFAULT_LANGUAGE: &str = "ru";

/// Identity extracted from a verified assertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: SubjectId,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub language_code: String,
    pub is_premium: bool,
    pub photo_url: String,
    pub auth_date: DateTime<Utc>,
}

/// Verifies signed identity assertions. Pure and `Send + Sync`.
pub struct IdentityVerifier {
    /// `None` means insecure mode.
    secret_key: Option<Zeroizing<Vec<u8>>>,
    environment: Environment,
    max_age: Duration,
    user_limits: MetadataLimits,
}

impl std::fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityVerifier")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .field("environment", &self.environment)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl IdentityVerifier {
    pub fn new(
        bot_token: Option<SecretString>,
        environment: Environment,
        max_age: Duration,
    ) -> Result<Self, AuthError> {
        let secret_key = match bot_token.filter(|t| !t.is_empty()) {
            Some(token) => Some(Zeroizing::new(derive_secret_key(token.expose().as_bytes())?)),
            None => None,
        };

        if secret_key.is_none() {
            tracing::warn!(
                environment = ?environment,
                "No bot token configured: identity assertions will NOT be verified"
            );
        }

        Ok(Self {
            secret_key,
            environment,
            max_age,
            user_limits: MetadataLimits {
                max_bytes: MAX_ASSERTION_LEN,
                ..MetadataLimits::default()
            },
        })
    }

    /// Whether signatures are actually checked.
    pub fn is_enforcing(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Verify a raw assertion as of `now`.
    pub fn verify(&self, raw: &str, now: DateTime<Utc>) -> Result<VerifiedIdentity, AuthError> {
        if raw.len() > MAX_ASSERTION_LEN {
            return Err(AuthError::MalformedInput(format!(
                "assertion exceeds {MAX_ASSERTION_LEN} bytes"
            )));
        }
        if raw.trim().is_empty() {
            return Err(AuthError::MalformedInput("assertion is empty".into()));
        }

        let params = parse_pairs(raw);
        if params.is_empty() {
            return Err(AuthError::MalformedInput(
                "assertion has no key=value pairs".into(),
            ));
        }

        let auth_date = match &self.secret_key {
            Some(key) => self.check_signature(key, &params, now)?,
            None if self.environment.is_production() => {
                return Err(AuthError::Configuration(
                    "identity verification disabled in production".into(),
                ));
            }
            None => params
                .get(AUTH_DATE_FIELD)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or_else(|| now.timestamp()),
        };

        let user_raw = params
            .get(USER_FIELD)
            .ok_or_else(|| AuthError::MalformedInput("user field is missing".into()))?;
        let user_json = percent_decode(user_raw)?;
        if user_json.trim().is_empty() {
            return Err(AuthError::MalformedInput("user field is empty".into()));
        }

        let user = MetadataValue::parse(&user_json, &self.user_limits)?;
        let subject = user
            .get("id")
            .and_then(MetadataValue::as_i64)
            .filter(|id| *id != 0)
            .map(SubjectId)
            .ok_or_else(|| AuthError::MalformedInput("user object lacks an id".into()))?;

        let text = |key: &str| {
            user.get(key)
                .and_then(MetadataValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let language_code = match text("language_code") {
            code if code.is_empty() => DEFAULT_LANGUAGE.to_string(),
            code => code,
        };

        Ok(VerifiedIdentity {
            subject,
            first_name: text("first_name"),
            last_name: text("last_name"),
            username: text("username"),
            language_code,
            is_premium: user
                .get("is_premium")
                .and_then(MetadataValue::as_bool)
                .unwrap_or(false),
            photo_url: text("photo_url"),
            auth_date: Utc.timestamp_opt(auth_date, 0).single().unwrap_or(now),
        })
    }

    /// Returns the issuance time (unix seconds) on success.
    fn check_signature(
        &self,
        secret_key: &[u8],
        params: &BTreeMap<&str, &str>,
        now: DateTime<Utc>,
    ) -> Result<i64, AuthError> {
        let supplied = params
            .get(HASH_FIELD)
            .ok_or(AuthError::SignatureMismatch)?;

        let check_string = data_check_string(params)?;
        let expected = sign(secret_key, &check_string)?;

        if !constant_time_compare(&expected, supplied) {
            return Err(AuthError::SignatureMismatch);
        }

        // Anything but a plain integer counts as 0 and is therefore stale.
        let auth_date = params
            .get(AUTH_DATE_FIELD)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let age_secs = now.timestamp() - auth_date;
        let max_age_secs = self.max_age.as_secs() as i64;
        if age_secs > max_age_secs {
            return Err(AuthError::StaleAssertion {
                age_secs,
                max_age_secs,
            });
        }

        Ok(auth_date)
    }
}

/// `HMAC_SHA256(key = "WebAppData", msg = bot_token)`.
fn derive_secret_key(bot_token: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(WEB_APP_DATA)
        .map_err(|e| AuthError::Configuration(e.to_string()))?;
    mac.update(bot_token);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sign(secret_key: &[u8], message: &str) -> Result<String, AuthError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret_key)
        .map_err(|e| AuthError::Configuration(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Last occurrence of a key wins. A value runs from the first `=` to the
/// next `&`, raw `=` included, since the signer covers the whole value.
fn parse_pairs(raw: &str) -> BTreeMap<&str, &str> {
    raw.split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn data_check_string(params: &BTreeMap<&str, &str>) -> Result<String, AuthError> {
    let lines = params
        .iter()
        .filter(|(k, _)| **k != HASH_FIELD)
        .map(|(k, v)| percent_decode(v).map(|decoded| format!("{k}={decoded}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

fn percent_decode(value: &str) -> Result<String, AuthError> {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .map_err(|_| AuthError::MalformedInput("value is not valid percent-encoded UTF-8".into()))
}

/// Build a signed assertion in the platform's wire format.
///
/// Values are given decoded; they are percent-encoded in the output.
/// Used by local tooling and test fixtures to mint assertions.
pub fn sign_assertion(bot_token: &str, fields: &[(&str, &str)]) -> Result<String, AuthError> {
    let secret_key = Zeroizing::new(derive_secret_key(bot_token.as_bytes())?);

    let mut sorted: Vec<(&str, &str)> = fields
        .iter()
        .copied()
        .filter(|(k, _)| *k != HASH_FIELD)
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let check_string = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let hash = sign(&secret_key, &check_string)?;

    let mut parts: Vec<String> = fields
        .iter()
        .filter(|(k, _)| *k != HASH_FIELD)
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect();
    parts.push(format!("{HASH_FIELD}={hash}"));
    Ok(parts.join("&"))
}
