//! Resource generators and their registry.
//!
//! Generators turn (proxy, snapshot, watched state, request) into the
//! concrete any-wrapped resources of one type. Rendering itself lives
//! outside this workspace; the server resolves a generator per request
//! through a two-level lookup: `{flavor}/{type-url}` from the node
//! metadata first, then the bare type URL, then the registry default.

use std::collections::HashMap;
use std::sync::Arc;

use mesh_core::DiscoveryError;
use mesh_push::{Proxy, PushContext, PushRequest, WatchedResource};

/// Renders resources of one type for one proxy.
///
/// A `Ok(None)` return means "nothing to send, but ack the version":
/// the server reports the proxy as up to date without pushing.
pub trait ResourceGenerator: Send + Sync {
    /// Generate the resources for `watched.type_url`.
    fn generate(
        &self,
        proxy: &Proxy,
        push: &PushContext,
        watched: &WatchedResource,
        req: &PushRequest,
    ) -> Result<Option<Vec<prost_types::Any>>, DiscoveryError>;
}

/// Registry of generators keyed by `{flavor}/{type-url}` or bare type
/// URL, with an optional default.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn ResourceGenerator>>,
    default: Option<Arc<dyn ResourceGenerator>>,
}

impl GeneratorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator under a key: a bare type URL, or
    /// `{flavor}/{type-url}` to serve only nodes requesting that flavor.
    pub fn register(&mut self, key: impl Into<String>, generator: Arc<dyn ResourceGenerator>) {
        self.generators.insert(key.into(), generator);
    }

    /// Set the fallback generator used when no key matches.
    pub fn set_default(&mut self, generator: Arc<dyn ResourceGenerator>) {
        self.default = Some(generator);
    }

    /// Resolve the generator for a request: flavor-scoped entry first,
    /// then the type entry, then the default.
    pub fn resolve(&self, flavor: &str, type_url: &str) -> Option<Arc<dyn ResourceGenerator>> {
        if !flavor.is_empty() {
            if let Some(generator) = self.generators.get(&format!("{flavor}/{type_url}")) {
                return Some(Arc::clone(generator));
            }
        }
        if let Some(generator) = self.generators.get(type_url) {
            return Some(Arc::clone(generator));
        }
        self.default.clone()
    }

    /// Number of registered entries (excluding the default).
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Whether no generators are registered.
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty() && self.default.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(&'static str);

    impl ResourceGenerator for Marker {
        fn generate(
            &self,
            _proxy: &Proxy,
            _push: &PushContext,
            _watched: &WatchedResource,
            _req: &PushRequest,
        ) -> Result<Option<Vec<prost_types::Any>>, DiscoveryError> {
            Ok(Some(vec![prost_types::Any {
                type_url: self.0.to_string(),
                value: vec![],
            }]))
        }
    }

    fn marker_name(generator: &Arc<dyn ResourceGenerator>) -> String {
        use mesh_push::{Environment, MeshConfig, TriggerReason};
        use mesh_registry::MemoryStore;
        use std::collections::HashMap as StdHashMap;

        let env = Environment::new(Arc::new(MemoryStore::new()), MeshConfig::default());
        let push = env.update_push_context(None).unwrap();
        let proxy = Proxy::from_node(
            "sidecar~10.0.0.1~a.b~b.svc.cluster.local",
            StdHashMap::new(),
        )
        .unwrap();
        let watched = WatchedResource::new("t", vec![]);
        let req = mesh_push::PushRequest::full(TriggerReason::Debug);
        generator
            .generate(&proxy, &push, &watched, &req)
            .unwrap()
            .unwrap()[0]
            .type_url
            .clone()
    }

    #[test]
    fn flavor_lookup_wins_over_type() {
        let mut registry = GeneratorRegistry::new();
        registry.register("type.a", Arc::new(Marker("plain")));
        registry.register("agent/type.a", Arc::new(Marker("flavored")));

        let by_flavor = registry.resolve("agent", "type.a").unwrap();
        assert_eq!(marker_name(&by_flavor), "flavored");

        let plain = registry.resolve("", "type.a").unwrap();
        assert_eq!(marker_name(&plain), "plain");
    }

    #[test]
    fn missing_entries_fall_back_to_default() {
        let mut registry = GeneratorRegistry::new();
        registry.set_default(Arc::new(Marker("default")));

        let resolved = registry.resolve("agent", "type.unknown").unwrap();
        assert_eq!(marker_name(&resolved), "default");
    }

    #[test]
    fn no_default_resolves_to_none() {
        let registry = GeneratorRegistry::new();
        assert!(registry.resolve("", "type.unknown").is_none());
    }
}
