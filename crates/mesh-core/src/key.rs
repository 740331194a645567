//! Config identifiers and hashing.
//!
//! [`ConfigKey`] is the canonical (kind, namespace, name) triple used in
//! configs-updated sets. [`ResourceKey`] is the colon-separated form used
//! by the distribution status subsystem (`kind:namespace:name`).

use std::fmt;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

use crate::kind::ConfigKind;

/// Identifier of a configuration object: (kind, namespace, name).
///
/// Keys are cheap to clone and hash; the FNV-1a hash over the triple is
/// the canonical value used in configs-updated sets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Kind of the object.
    pub kind: ConfigKind,
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
}

impl ConfigKey {
    /// Create a new config key.
    pub fn new(kind: ConfigKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// FNV-1a hash over (kind, namespace, name).
    pub fn hash_code(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        self.kind.as_str().hash(&mut hasher);
        self.namespace.hash(&mut hasher);
        self.name.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Identifier used by the distribution status tracker.
///
/// Rendered as `kind:namespace:name` (three colon-separated tokens), this
/// is the configmap data key and the keyed-lock key. Reporters may append
/// a fourth `:resourceVersion` token; it is parsed when present and used
/// for the stale-version prune.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    /// Kind of the tracked object.
    pub kind: ConfigKind,
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
    /// Resource version the reporter observed, when it supplied one.
    pub resource_version: Option<String>,
}

impl ResourceKey {
    /// Create a key without a resource version.
    pub fn new(kind: ConfigKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            resource_version: None,
        }
    }

    /// Attach a resource version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.resource_version = Some(version.into());
        self
    }

    /// The canonical three-token string, `kind:namespace:name`.
    ///
    /// The resource version is intentionally excluded: state for different
    /// versions of one object must collapse to one tracker entry key.
    pub fn to_key_string(&self) -> String {
        format!("{}:{}:{}", self.kind, self.namespace, self.name)
    }

    /// Parse `kind:namespace:name` with an optional fourth
    /// `resourceVersion` token.
    pub fn parse(s: &str) -> Option<ResourceKey> {
        let mut parts = s.splitn(4, ':');
        let kind = ConfigKind::parse(parts.next()?)?;
        let namespace = parts.next()?;
        let name = parts.next()?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        let resource_version = parts.next().filter(|v| !v.is_empty()).map(str::to_string);
        Some(ResourceKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version,
        })
    }

    /// The corresponding [`ConfigKey`].
    pub fn config_key(&self) -> ConfigKey {
        ConfigKey::new(self.kind, self.name.clone(), self.namespace.clone())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        let key = ConfigKey::new(ConfigKind::DestinationRule, "reviews", "bookinfo");
        assert_eq!(key.to_string(), "destination-rule/bookinfo/reviews");
    }

    #[test]
    fn key_hash_deterministic() {
        let a = ConfigKey::new(ConfigKind::Service, "a", "ns");
        let b = ConfigKey::new(ConfigKind::Service, "a", "ns");
        assert_eq!(a.hash_code(), b.hash_code());

        let c = ConfigKey::new(ConfigKind::Service, "a", "other");
        assert_ne!(a.hash_code(), c.hash_code());
    }

    #[test]
    fn resource_key_format() {
        let key = ResourceKey::new(ConfigKind::VirtualService, "default", "reviews");
        assert_eq!(key.to_key_string(), "virtual-service:default:reviews");
    }

    #[test]
    fn resource_key_parse_three_tokens() {
        let key = ResourceKey::parse("virtual-service:default:reviews").unwrap();
        assert_eq!(key.kind, ConfigKind::VirtualService);
        assert_eq!(key.namespace, "default");
        assert_eq!(key.name, "reviews");
        assert!(key.resource_version.is_none());
    }

    #[test]
    fn resource_key_parse_with_version() {
        let key = ResourceKey::parse("gateway:prod:edge:12345").unwrap();
        assert_eq!(key.kind, ConfigKind::Gateway);
        assert_eq!(key.resource_version.as_deref(), Some("12345"));
        // Version never leaks into the canonical key string.
        assert_eq!(key.to_key_string(), "gateway:prod:edge");
    }

    #[test]
    fn resource_key_parse_rejects_malformed() {
        assert!(ResourceKey::parse("no-such-kind:a:b").is_none());
        assert!(ResourceKey::parse("gateway:a").is_none());
        assert!(ResourceKey::parse("gateway::b").is_none());
    }
}
