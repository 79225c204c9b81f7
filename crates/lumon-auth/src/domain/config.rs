//! Auth gate configuration with validation.
//!
//! Injected into every service at construction. Nothing here is global.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::token::SecretString;

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Main auth configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub environment: Environment,
    /// Identity assertion verification
    pub identity: IdentityConfig,
    /// Session lifecycle
    pub session: SessionConfig,
    /// Per-endpoint fixed-window ceilings
    pub rate_limits: RateLimitTable,
    /// Idempotent write cache
    pub idempotency: IdempotencyConfig,
    /// CSRF tokens and origin policy
    pub csrf: CsrfConfig,
    /// Persistence deadlines
    pub store: StoreConfig,
    /// HTTP listener
    pub http: HttpConfig,
    /// Legal document acceptance
    pub legal: LegalConfig,
}

impl AuthConfig {
    /// Build from defaults overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(env) = non_empty("LUMON_ENV").or_else(|| non_empty("NODE_ENV")) {
            config.environment = Environment::parse(&env);
        }

        config.identity.bot_token = non_empty("TELEGRAM_BOT_TOKEN").map(SecretString::new);

        if let Some(days) = non_empty("SESSION_EXPIRY_DAYS") {
            let days: u64 = days
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar("SESSION_EXPIRY_DAYS".into()))?;
            config.session.ttl = Duration::from_secs(days * 86_400);
        }

        config.csrf.secret_key = non_empty("CSRF_SECRET_KEY").map(SecretString::new);

        if let Some(origins) = non_empty("CORS_ORIGINS") {
            config.csrf.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if let Some(port) = non_empty("PORT") {
            config.http.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar("PORT".into()))?;
        }

        if let Some(flag) = non_empty("LUMON_REQUIRE_LEGAL") {
            config.legal.require_acceptance = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }

        if let Some(timeout) = non_empty("LUMON_STORE_TIMEOUT") {
            config.store.timeout = humantime_serde::parse_duration(&timeout)
                .map_err(|_| ConfigError::InvalidVar("LUMON_STORE_TIMEOUT".into()))?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.is_production() {
            if self.identity.bot_token.as_ref().map_or(true, |t| t.is_empty()) {
                return Err(ConfigError::InsecureIdentity);
            }
            if self.csrf.secret_key.as_ref().map_or(true, |k| k.is_empty()) {
                return Err(ConfigError::MissingCsrfKey);
            }
        }

        if self.identity.max_assertion_age.is_zero() {
            return Err(ConfigError::InvalidTtl("max_assertion_age cannot be 0".into()));
        }
        if self.session.ttl.is_zero() {
            return Err(ConfigError::InvalidTtl("session ttl cannot be 0".into()));
        }
        if self.session.secret_bytes < 16 {
            return Err(ConfigError::Invalid(
                "session secret must be at least 16 bytes".into(),
            ));
        }

        for (endpoint, rule) in self.rate_limits.iter() {
            if rule.max_requests == 0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{endpoint}: max_requests cannot be 0"
                )));
            }
            if rule.window.is_zero() {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{endpoint}: window cannot be 0"
                )));
            }
        }

        if self.idempotency.ttl.is_zero() {
            return Err(ConfigError::InvalidTtl("idempotency ttl cannot be 0".into()));
        }
        if self.idempotency.max_key_len == 0 {
            return Err(ConfigError::Invalid("max_key_len cannot be 0".into()));
        }
        if self.csrf.token_lifetime.is_zero() {
            return Err(ConfigError::InvalidTtl("csrf token lifetime cannot be 0".into()));
        }
        if self.store.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout("store timeout cannot be 0".into()));
        }

        Ok(())
    }
}

/// Identity assertion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Shared bot token. `None` disables verification (development only).
    pub bot_token: Option<SecretString>,
    /// Assertions issued longer ago than this are rejected
    #[serde(with = "humantime_serde")]
    pub max_assertion_age: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            max_assertion_age: Duration::from_secs(3600),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Random bytes per secret before hex encoding
    pub secret_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7 * 86_400),
            secret_bytes: 32,
        }
    }
}

/// One endpoint's ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

/// Server-side rate limit table. Client input never reaches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitTable {
    pub endpoints: HashMap<String, RateLimitRule>,
    pub default: RateLimitRule,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        let endpoints = [
            ("chat-save-message", 30),
            ("chat-list", 100),
            ("chat-history", 50),
            ("chat-create", 10),
            ("chat-delete", 20),
            ("analytics-log-event", 100),
        ]
        .into_iter()
        .map(|(name, max)| (name.to_string(), RateLimitRule::per_minute(max)))
        .collect();

        Self {
            endpoints,
            default: RateLimitRule::per_minute(60),
        }
    }
}

impl RateLimitTable {
    /// Rule for an endpoint, falling back to the default entry.
    pub fn rule_for(&self, endpoint: &str) -> RateLimitRule {
        self.endpoints.get(endpoint).copied().unwrap_or(self.default)
    }

    /// Whether the endpoint has its own entry.
    pub fn is_known(&self, endpoint: &str) -> bool {
        self.endpoints.contains_key(endpoint)
    }

    /// All rules including the default.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimitRule)> {
        self.endpoints
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .chain(std::iter::once(("default", &self.default)))
    }

    pub fn set(&mut self, endpoint: impl Into<String>, rule: RateLimitRule) {
        self.endpoints.insert(endpoint.into(), rule);
    }
}

/// Idempotency configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Fixed at record creation, never extended
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub max_key_len: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            max_key_len: 255,
        }
    }
}

/// CSRF configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// HMAC key. Generated per process when absent (development only).
    pub secret_key: Option<SecretString>,
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,
    /// Exact origins accepted for state-changing requests
    pub allowed_origins: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            token_lifetime: Duration::from_secs(60 * 60),
            allowed_origins: Vec::new(),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deadline for every outbound port call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3000,
        }
    }
}

impl HttpConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Legal documents configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LegalConfig {
    /// Refuse `authInit` until the user has accepted the documents
    pub require_acceptance: bool,
    pub current_version: String,
}

impl Default for LegalConfig {
    fn default() -> Self {
        Self {
            require_acceptance: false,
            current_version: "1.0".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Production without a bot token would skip identity verification
    #[error("identity verification disabled in production: TELEGRAM_BOT_TOKEN is required")]
    InsecureIdentity,
    /// Production without a CSRF key
    #[error("CSRF_SECRET_KEY is required in production")]
    MissingCsrfKey,
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Environment variable present but unparseable
    #[error("invalid value for environment variable {0}")]
    InvalidVar(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|_| "invalid hours")
        } else if let Some(days) = s.strip_suffix('d') {
            days.trim()
                .parse::<u64>()
                .map(|d| Duration::from_secs(d * 86_400))
                .map_err(|_| "invalid days")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
