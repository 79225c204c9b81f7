//! Prometheus metrics for the auth gate.
//!
//! All metrics follow the naming convention: `lumon_auth_<metric>_<unit>`.
//! Label values are always drawn from server-side tables (error kinds,
//! configured endpoint names, tail job kinds), never from client input.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Sessions created after a successful identity verification
    pub static ref SESSIONS_ISSUED: Counter = Counter::new(
        "lumon_auth_sessions_issued_total",
        "Total number of sessions issued"
    ).expect("metric creation failed");

    /// Session validations by outcome (ok, not_found, expired)
    pub static ref SESSION_VALIDATIONS: CounterVec = CounterVec::new(
        Opts::new("lumon_auth_session_validations_total", "Session validations by outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Identity assertion failures by error kind
    pub static ref IDENTITY_FAILURES: CounterVec = CounterVec::new(
        Opts::new("lumon_auth_identity_failures_total", "Rejected identity assertions by kind"),
        &["kind"]
    ).expect("metric creation failed");

    /// Requests rejected by the fixed-window rate limiter
    pub static ref RATE_LIMIT_REJECTIONS: CounterVec = CounterVec::new(
        Opts::new("lumon_auth_rate_limit_rejections_total", "Rate-limited requests by endpoint"),
        &["endpoint"]
    ).expect("metric creation failed");

    /// Guarded writes answered from the idempotency cache
    pub static ref IDEMPOTENT_REPLAYS: Counter = Counter::new(
        "lumon_auth_idempotent_replays_total",
        "Requests short-circuited by a cached idempotent response"
    ).expect("metric creation failed");

    /// Side writes after the action that failed (audit, idempotency, touch)
    pub static ref TAIL_FAILURES: CounterVec = CounterVec::new(
        Opts::new("lumon_auth_tail_failures_total", "Failed post-action writes by kind"),
        &["job"]
    ).expect("metric creation failed");

    /// End-to-end latency of guarded actions
    pub static ref GATE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "lumon_auth_gate_duration_seconds",
            "Time spent in the request gate including the action"
        ).buckets(exponential_buckets(0.0005, 2.0, 14).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already-registered collectors are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SESSIONS_ISSUED.clone()),
        Box::new(SESSION_VALIDATIONS.clone()),
        Box::new(IDENTITY_FAILURES.clone()),
        Box::new(RATE_LIMIT_REJECTIONS.clone()),
        Box::new(IDEMPOTENT_REPLAYS.clone()),
        Box::new(TAIL_FAILURES.clone()),
        Box::new(GATE_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
