//! Extensions registry: models a node's API-extension capability vector
//! and enforces the syntactic and ordering contracts from spec §4.2.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use clusterd_core::{DaemonError, Result, VersionComparison};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(_[a-z0-9]+)*$").expect("valid regex"));

/// Ordered, append-only set of registered API-extension names.
///
/// Order is significant and reflects registration order: two registries
/// are the "same version" only if their sequences match exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extensions(Vec<String>);

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(names: Vec<String>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(names)?;
        Ok(registry)
    }

    /// Append new extension names, rejecting duplicates and invalid names.
    ///
    /// Internal names (used for extensions that are not part of the public
    /// API surface a consumer negotiates over) must carry the `internal:`
    /// prefix; all names, with or without that prefix, must otherwise
    /// match `^[a-z0-9]+(_[a-z0-9]+)*$`.
    pub fn register(&mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Result<()> {
        for name in names {
            let name = name.into();
            validate_name(&name)?;
            if self.0.contains(&name) {
                return Err(DaemonError::Conflict(format!(
                    "extension {name} already registered"
                )));
            }
            self.0.push(name);
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compares order-sensitively against another registry's snapshot.
    /// Fails if lengths differ or any position mismatches.
    pub fn is_same_version(&self, other: &[String]) -> bool {
        self.0.len() == other.len() && self.0 == other
    }

    /// Order-sensitive three-way comparison, used by the database
    /// gateway's `waitUpgrade` barrier.
    pub fn compare(&self, other: &[String]) -> VersionComparison {
        if self.0 == other {
            return VersionComparison::Equal;
        }
        if self.0.len() > other.len() && self.0[..other.len()] == *other {
            return VersionComparison::Ahead;
        }
        if other.len() > self.0.len() && other[..self.0.len()] == self.0[..] {
            return VersionComparison::Behind;
        }
        VersionComparison::Diverged
    }

    /// JSON array serialization; an empty list serializes as `"[]"`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let names: Vec<String> = serde_json::from_str(json)
            .map_err(|e| DaemonError::BadRequest(format!("invalid extensions JSON: {e}")))?;
        Self::from_vec(names)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let syntactic = name.strip_prefix("internal:").unwrap_or(name);
    if syntactic.is_empty() || !NAME_RE.is_match(syntactic) {
        return Err(DaemonError::BadRequest(format!(
            "invalid extension name: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_rejects_invalid_names() {
        let mut ext = Extensions::new();
        assert!(ext.register(["Bad-Name"]).is_err());
        assert!(ext.register(["_leading_underscore"]).is_err());
        assert!(ext.register(["ok_name"]).is_ok());
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut ext = Extensions::new();
        ext.register(["clustering"]).unwrap();
        assert!(ext.register(["clustering"]).is_err());
    }

    #[test]
    fn internal_prefix_is_accepted() {
        let mut ext = Extensions::new();
        assert!(ext.register(["internal:schema_split"]).is_ok());
    }

    #[test]
    fn is_same_version_respects_order() {
        let mut a = Extensions::new();
        a.register(["a", "b"]).unwrap();
        let mut b = Extensions::new();
        b.register(["b", "a"]).unwrap();

        assert!(!a.is_same_version(b.as_slice()));
        assert!(a.is_same_version(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn json_roundtrip_preserves_order_and_empty_default() {
        let mut ext = Extensions::new();
        ext.register(["a", "b"]).unwrap();
        let json = ext.to_json();
        let parsed = Extensions::from_json(&json).unwrap();
        assert!(ext.is_same_version(parsed.as_slice()));

        assert_eq!(Extensions::new().to_json(), "[]");
    }
}
