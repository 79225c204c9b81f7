//! # Domain Module
//!
//! Pure types and CPU-only logic: no I/O, no async.

pub mod config;
pub mod csrf;
pub mod entities;
pub mod envelope;
pub mod errors;
pub mod identity;
pub mod safe_json;
pub mod token;

pub use config::*;
pub use csrf::{CsrfToken, CsrfTokens};
pub use entities::*;
pub use envelope::{ApiErrorBody, ApiResponse};
pub use errors::*;
pub use identity::{sign_assertion, IdentityVerifier, VerifiedIdentity, MAX_ASSERTION_LEN};
pub use safe_json::{MetadataLimits, MetadataValue};
pub use token::{
    constant_time_compare, hash_secret, verify_secret, SecretString, SessionSecret, TokenDigest,
};
