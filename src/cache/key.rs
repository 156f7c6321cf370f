//! Cache key generation.
//!
//! Keys stay human-readable (no hashing) so that
//! [`invalidate_pattern`](super::CacheStore::invalidate_pattern) can match on
//! their content.

use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Deterministic cache key generator.
///
/// Two structurally equal parameter mappings produce byte-identical keys
/// regardless of field insertion order: object keys are collected into a
/// `BTreeMap` at every nesting level before serialization, never relying on
/// the source mapping's iteration order.
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    prefix: Option<String>,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    /// Namespace every generated key, e.g. per tenant or per view.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Build the canonical key for `resource` with the given parameters.
    ///
    /// Output shape: `[prefix:]resource:k1=v1&k2=v2` with keys sorted
    /// lexicographically and values in canonical JSON.
    pub fn generate<P: Serialize>(&self, resource: &str, params: &P) -> Result<String> {
        let value = serde_json::to_value(params)?;
        let pairs = match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> = map.into_iter().collect();
                sorted
                    .into_iter()
                    .map(|(k, v)| format!("{}={}", k, canonical(&v)))
                    .collect::<Vec<_>>()
                    .join("&")
            }
            Value::Null => String::new(),
            other => {
                return Err(Error::validation(format!(
                    "cache key params must be a mapping, got {}",
                    type_name(&other)
                )))
            }
        };
        let mut key = String::new();
        if let Some(ref p) = self.prefix {
            key.push_str(p);
            key.push(':');
        }
        key.push_str(resource);
        key.push(':');
        key.push_str(&pairs);
        Ok(key)
    }
}

/// Canonical JSON rendering: object keys sorted at every level, compact
/// separators, stable number formatting via `serde_json`.
fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let inner = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonical(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", inner)
        }
        Value::Array(items) => {
            let inner = items.iter().map(canonical).collect::<Vec<_>>().join(",");
            format!("[{}]", inner)
        }
        scalar => serde_json::to_string(scalar).unwrap_or_default(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
