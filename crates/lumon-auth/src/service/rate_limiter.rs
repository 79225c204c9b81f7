//! # Rate Limiter
//!
//! Fixed-window counter per (subject, endpoint).
//!
//! Windows are rolling from the first request, not aligned to the wall
//! clock. The ceiling is checked and the count incremented by one atomic
//! store primitive ([`RateLimitStore::increment_below`]), so two requests
//! can never both pass against the same pre-increment count. Starting a
//! fresh window is a compare-and-swap on the superseded `window_start`;
//! a caller that loses either race re-reads and tries again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{AuthError, RateLimitTable, SubjectId};
use crate::ports::{Clock, Increment, RateLimitStore};
use crate::service::deadline::with_deadline;

/// Re-reads allowed after losing a race before giving up.
const MAX_ATTEMPTS: usize = 8;

/// An admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub endpoint: String,
    /// Count in the current window including this request.
    pub count: u32,
    pub limit: u32,
    pub window_start: DateTime<Utc>,
    pub resets_at: DateTime<Utc>,
}

impl RateDecision {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    table: RateLimitTable,
    timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        table: RateLimitTable,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            table,
            timeout,
        }
    }

    /// Admit or reject one request. Thresholds come only from the table.
    pub async fn check_and_increment(
        &self,
        subject: SubjectId,
        endpoint: &str,
    ) -> Result<RateDecision, AuthError> {
        let rule = self.table.rule_for(endpoint);
        let window = chrono::Duration::from_std(rule.window)
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        for _ in 0..MAX_ATTEMPTS {
            let now = self.clock.now();
            let current = with_deadline(
                self.timeout,
                "rate_limit.current_window",
                self.store.current_window(subject, endpoint),
            )
            .await?;

            let superseded = match &current {
                None => None,
                Some(w) if w.window_start < now - window => Some(w.window_start),
                Some(w) => {
                    let step = with_deadline(
                        self.timeout,
                        "rate_limit.increment_below",
                        self.store
                            .increment_below(subject, endpoint, w.window_start, rule.max_requests),
                    )
                    .await?;
                    match step {
                        Increment::Counted(count) => {
                            return Ok(RateDecision {
                                endpoint: endpoint.to_string(),
                                count,
                                limit: rule.max_requests,
                                window_start: w.window_start,
                                resets_at: w.window_start + window,
                            });
                        }
                        Increment::AtCeiling => {
                            return Err(self.reject(subject, endpoint, w.window_start + window, now));
                        }
                        Increment::WindowGone => continue,
                    }
                }
            };

            let started = with_deadline(
                self.timeout,
                "rate_limit.start_window",
                self.store.start_window(subject, endpoint, superseded, now),
            )
            .await?;
            if started {
                tracing::trace!(subject = %subject, endpoint, "Rate limit window started");
                return Ok(RateDecision {
                    endpoint: endpoint.to_string(),
                    count: 1,
                    limit: rule.max_requests,
                    window_start: now,
                    resets_at: now + window,
                });
            }
        }

        // Sustained contention on one key; refuse rather than admit unchecked.
        tracing::warn!(subject = %subject, endpoint, "Rate limiter gave up after repeated races");
        Err(self.reject(subject, endpoint, self.clock.now() + chrono::Duration::seconds(1), self.clock.now()))
    }

    fn reject(
        &self,
        subject: SubjectId,
        endpoint: &str,
        resets_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AuthError {
        let retry_after_secs = ceil_secs(resets_at - now).max(1);
        let label = if self.table.is_known(endpoint) {
            endpoint
        } else {
            "default"
        };
        lumon_telemetry::log_rejection!(
            "rate_exceeded",
            "Rate limit exceeded",
            subject = %subject,
            endpoint,
            retry_after_secs
        );
        lumon_telemetry::metric_inc!(lumon_telemetry::RATE_LIMIT_REJECTIONS, &[label]);
        AuthError::RateExceeded {
            endpoint: endpoint.to_string(),
            retry_after_secs,
        }
    }
}

fn ceil_secs(d: chrono::Duration) -> u64 {
    let millis = d.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}
