//! # Bounded Metadata Values
//!
//! Client-supplied JSON is never kept as an open map. It is converted into
//! [`MetadataValue`], a closed sum type, after:
//!
//! - stripping prototype-polluting keys (`__proto__`, `constructor`,
//!   `prototype`) at every level
//! - enforcing a nesting depth ceiling
//! - enforcing a serialized size ceiling
//! - optionally restricting the top-level keys

use serde::Serialize;
use std::collections::BTreeMap;

use super::errors::AuthError;

/// Keys removed from every object before use.
pub const DANGEROUS_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Default nesting ceiling.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Default serialized size ceiling (100 KiB).
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024;

/// Bounds applied when converting JSON.
#[derive(Debug, Clone)]
pub struct MetadataLimits {
    pub max_depth: usize,
    pub max_bytes: usize,
    pub allowed_keys: Option<Vec<String>>,
}

impl Default for MetadataLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_bytes: DEFAULT_MAX_BYTES,
            allowed_keys: None,
        }
    }
}

impl MetadataLimits {
    pub fn with_allowed_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

/// Depth- and size-bounded JSON value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<MetadataValue>),
    Object(BTreeMap<String, MetadataValue>),
}

impl MetadataValue {
    /// Parse raw JSON text with the hardened rules.
    ///
    /// Syntax errors are `MalformedInput`; bound violations are `ValidationFailed`.
    pub fn parse(raw: &str, limits: &MetadataLimits) -> Result<Self, AuthError> {
        if raw.len() > limits.max_bytes {
            return Err(AuthError::ValidationFailed(format!(
                "metadata exceeds {} bytes",
                limits.max_bytes
            )));
        }
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| AuthError::MalformedInput(format!("invalid JSON: {e}")))?;
        Self::from_json(&value, limits)
    }

    /// Convert an already-parsed JSON value.
    pub fn from_json(value: &serde_json::Value, limits: &MetadataLimits) -> Result<Self, AuthError> {
        let size = serde_json::to_vec(value)
            .map_err(|e| AuthError::ValidationFailed(e.to_string()))?
            .len();
        if size > limits.max_bytes {
            return Err(AuthError::ValidationFailed(format!(
                "metadata exceeds {} bytes",
                limits.max_bytes
            )));
        }

        if let (Some(allowed), serde_json::Value::Object(map)) = (&limits.allowed_keys, value) {
            if let Some(key) = map
                .keys()
                .find(|k| !DANGEROUS_KEYS.contains(&k.as_str()) && !allowed.contains(k))
            {
                return Err(AuthError::ValidationFailed(format!(
                    "metadata key not allowed: {key}"
                )));
            }
        }

        convert(value, 0, limits.max_depth)
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        match self {
            MetadataValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Integer view; accepts integral floats and integer strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(n) => Some(*n),
            MetadataValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                let n = *f as i64;
                (n as f64 == *f).then_some(n)
            }
            MetadataValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Nesting depth; scalars are 0.
    pub fn depth(&self) -> usize {
        match self {
            MetadataValue::Array(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            MetadataValue::Object(map) => 1 + map.values().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

fn convert(value: &serde_json::Value, depth: usize, max_depth: usize) -> Result<MetadataValue, AuthError> {
    use serde_json::Value;

    let nested = matches!(value, Value::Array(_) | Value::Object(_));
    if nested && depth >= max_depth {
        return Err(AuthError::ValidationFailed(format!(
            "metadata nesting exceeds depth {max_depth}"
        )));
    }

    Ok(match value {
        Value::Null => MetadataValue::Null,
        Value::Bool(b) => MetadataValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => MetadataValue::Integer(i),
            None => MetadataValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => MetadataValue::String(s.clone()),
        Value::Array(items) => MetadataValue::Array(
            items
                .iter()
                .map(|v| convert(v, depth + 1, max_depth))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                if DANGEROUS_KEYS.contains(&k.as_str()) {
                    continue;
                }
                out.insert(k.clone(), convert(v, depth + 1, max_depth)?);
            }
            MetadataValue::Object(out)
        }
    })
}
