//! The `_meta` extension channel: a validated, mergeable mapping of
//! provider-namespace hints attached to requests, content blocks, and
//! responses (spec §3).

use serde_json::{Map, Value};
use std::fmt;

/// Top-level namespaces this proxy understands. Unknown keys are handled
/// per [`MetaPolicy`].
pub const KNOWN_NAMESPACES: &[&str] = &["proxy", "anthropic", "openai", "ollama"];

/// How `validate` treats top-level keys outside [`KNOWN_NAMESPACES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetaPolicy {
    /// Unknown top-level keys fail validation with `InvalidParams`.
    Strict,
    /// Unknown top-level keys are silently dropped.
    Strip,
    /// Unknown top-level keys are kept, logged once per key per request.
    #[default]
    Permissive,
}

/// A `_meta` mapping: top-level keys are provider namespaces, values are
/// arbitrary JSON objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata(pub Map<String, Value>);

#[derive(Debug)]
pub struct MetaValidationError(pub String);

impl fmt::Display for MetaValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for MetaValidationError {}

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            Value::Null => Some(Self::new()),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn namespace(&self, ns: &str) -> Option<&Map<String, Value>> {
        self.0.get(ns).and_then(Value::as_object)
    }

    /// Reads a dotted path under a namespace, e.g. `get_path("pi", "thinkingLevel")`.
    pub fn get_path(&self, ns: &str, key: &str) -> Option<&Value> {
        self.namespace(ns).and_then(|m| m.get(key))
    }

    /// Validates top-level keys against [`KNOWN_NAMESPACES`] under `policy`,
    /// returning the (possibly stripped) metadata, tracking any keys that
    /// triggered a `Permissive` warning.
    pub fn validate(self, policy: MetaPolicy) -> Result<(Self, Vec<String>), MetaValidationError> {
        let mut warned = Vec::new();
        match policy {
            MetaPolicy::Strict => {
                for key in self.0.keys() {
                    if !KNOWN_NAMESPACES.contains(&key.as_str()) {
                        return Err(MetaValidationError(format!(
                            "unknown _meta namespace: {key}"
                        )));
                    }
                }
                Ok((self, warned))
            }
            MetaPolicy::Strip => {
                let mut map = Map::new();
                for (k, v) in self.0.into_iter() {
                    if KNOWN_NAMESPACES.contains(&k.as_str()) {
                        map.insert(k, v);
                    }
                }
                Ok((Self(map), warned))
            }
            MetaPolicy::Permissive => {
                for key in self.0.keys() {
                    if !KNOWN_NAMESPACES.contains(&key.as_str()) {
                        warned.push(key.clone());
                    }
                }
                Ok((self, warned))
            }
        }
    }

    /// Shallow, right-biased merge: top-level keys merge one level deep
    /// (namespace maps merge shallowly too); `other` wins on conflict
    /// (spec §8 invariant 8).
    pub fn merge(mut self, other: Metadata) -> Metadata {
        for (key, other_val) in other.0.into_iter() {
            match (self.0.get_mut(&key), other_val) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.insert(k, v);
                    }
                }
                (_, incoming) => {
                    self.0.insert(key, incoming);
                }
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(v: Value) -> Metadata {
        Metadata::from_value(v).unwrap()
    }

    #[test]
    fn strict_rejects_unknown_namespace() {
        let m = meta(json!({"unknown_vendor": {"x": 1}}));
        assert!(m.validate(MetaPolicy::Strict).is_err());
    }

    #[test]
    fn strip_drops_unknown_namespace() {
        let m = meta(json!({"anthropic": {"top_p": 0.9}, "evil": {"x": 1}}));
        let (out, _) = m.validate(MetaPolicy::Strip).unwrap();
        assert!(out.namespace("anthropic").is_some());
        assert!(out.namespace("evil").is_none());
    }

    #[test]
    fn permissive_keeps_and_warns() {
        let m = meta(json!({"mystery": {"x": 1}}));
        let (out, warned) = m.validate(MetaPolicy::Permissive).unwrap();
        assert!(out.namespace("mystery").is_some());
        assert_eq!(warned, vec!["mystery".to_string()]);
    }

    #[test]
    fn merge_is_right_biased() {
        let a = meta(json!({"anthropic": {"model": "claude-a", "top_p": 0.5}}));
        let b = meta(json!({"anthropic": {"model": "claude-b"}}));
        let merged = a.merge(b);
        assert_eq!(
            merged.get_path("anthropic", "model").unwrap(),
            &json!("claude-b")
        );
        assert_eq!(
            merged.get_path("anthropic", "top_p").unwrap(),
            &json!(0.5)
        );
    }
}
