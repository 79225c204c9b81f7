//! # Token Hasher
//!
//! One-way digests for session secrets and the constant-time comparison
//! used everywhere a secret-derived value is checked.
//!
//! Session secrets leave the process exactly once (in the `authInit`
//! response). Only their SHA-256 digest is stored.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Lowercase hex SHA-256 digest of a session secret.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenDigest(String);

impl TokenDigest {
    /// Wrap an already-computed hex digest (e.g. loaded from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for TokenDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Prefix only; enough to correlate log lines.
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "TokenDigest({prefix}..)")
    }
}

/// Plaintext session secret handed to the client.
///
/// Zeroized on drop and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret {
    inner: String,
}

impl SessionSecret {
    /// Generate `len` random bytes and hex-encode them.
    pub fn generate(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        let inner = hex::encode(&bytes);
        bytes.zeroize();
        Self { inner }
    }

    /// Wrap a secret received from a client.
    pub fn from_client(raw: impl Into<String>) -> Self {
        Self { inner: raw.into() }
    }

    /// Expose the plaintext. Use immediately and let go.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    /// Digest suitable for at-rest storage.
    pub fn digest(&self) -> TokenDigest {
        hash_secret(&self.inner)
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret(***)")
    }
}

/// Configuration secret (bot token, CSRF key).
///
/// Deserializes from a plain string; serializes and prints redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Deterministic one-way hash of a secret.
pub fn hash_secret(secret: &str) -> TokenDigest {
    let digest = Sha256::digest(secret.as_bytes());
    TokenDigest(hex::encode(digest))
}

/// Check a candidate plaintext against a stored digest.
pub fn verify_secret(candidate: &str, stored: &TokenDigest) -> bool {
    constant_time_compare(hash_secret(candidate).as_str(), stored.as_str())
}

/// Constant-time string comparison.
///
/// Runtime depends only on the longer of the two lengths, not on the
/// position of the first differing byte. Both inputs are padded to a
/// common length with distinct pad bytes and the original lengths are
/// compared separately.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
