//! # Idempotency Cache
//!
//! Deduplicates retried state-changing requests by client-supplied key.
//!
//! The cached value is the exact response body that was sent the first
//! time, so a replay is byte-identical. The record is written before the
//! response leaves the gate, so a retry sent after the first response is
//! always answered from the cache. A failed write is logged and counted;
//! the original effect stands and only deduplication of later retries is
//! weakened.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{AuthError, IdempotencyConfig, IdempotencyRecord, StoreError, SubjectId};
use crate::ports::{Clock, IdempotencyStore};
use crate::service::deadline::with_deadline;

pub struct IdempotencyCache {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
    timeout: Duration,
}

impl IdempotencyCache {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            timeout,
        }
    }

    /// Keys are opaque; only their length is checked.
    pub fn validate_key(&self, key: &str) -> Result<(), AuthError> {
        if key.is_empty() || key.len() > self.config.max_key_len {
            return Err(AuthError::ValidationFailed(format!(
                "Idempotency-Key must be 1..={} bytes",
                self.config.max_key_len
            )));
        }
        Ok(())
    }

    /// Cached response for `key`, if a live record exists.
    ///
    /// A live record written for another subject is refused rather than
    /// replayed, so one user cannot read another's response by guessing
    /// a key.
    pub async fn lookup(&self, key: &str, subject: SubjectId) -> Result<Option<String>, AuthError> {
        self.validate_key(key)?;
        let found = with_deadline(self.timeout, "idempotency.find", self.store.find(key)).await?;

        match found {
            Some(record) if record.is_live(self.clock.now()) => {
                if record.subject != subject {
                    lumon_telemetry::log_rejection!(
                        "idempotency_key_conflict",
                        "Idempotency key belongs to another subject",
                        subject = %subject
                    );
                    return Err(AuthError::ValidationFailed(
                        "Idempotency-Key already used".into(),
                    ));
                }
                Ok(Some(record.response))
            }
            _ => Ok(None),
        }
    }

    /// Persist the response with `expires_at = now + ttl`.
    ///
    /// Only key and configuration errors are returned. Store failures are
    /// logged and counted, never surfaced: the action already ran.
    pub async fn remember(
        &self,
        key: &str,
        subject: SubjectId,
        response: String,
    ) -> Result<(), AuthError> {
        self.validate_key(key)?;
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        let record = IdempotencyRecord {
            key: key.to_string(),
            subject,
            response,
            created_at: now,
            expires_at: now + ttl,
        };
        let insert = async {
            match self.store.insert(record).await {
                // A concurrent retry already cached its response.
                Err(StoreError::Duplicate(key)) => {
                    tracing::debug!(%key, "Idempotency record already present");
                    Ok(())
                }
                other => other,
            }
        };
        if let Err(error) = with_deadline(self.timeout, "idempotency.insert", insert).await {
            tracing::warn!(subject = %subject, error = %error, "Idempotency record not persisted");
            lumon_telemetry::metric_inc!(lumon_telemetry::TAIL_FAILURES, &["idempotency"]);
        }
        Ok(())
    }
}
