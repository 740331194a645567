//! The config store trait and the aggregate registry.

use std::sync::Arc;

use mesh_core::{Config, ConfigKind, DiscoveryError};

use crate::event::EventHandler;

/// Read-only access to a collection of configuration objects.
///
/// Objects returned are immutable; callers that intend to mutate must
/// deep-copy first. Event handlers are invoked synchronously in the
/// backing store's task. List errors (a backing registry being
/// unavailable) propagate to the snapshot build, which keeps the last
/// good snapshot.
pub trait ConfigStore: Send + Sync {
    /// List objects of `kind`; `namespace = None` lists all namespaces.
    fn list(
        &self,
        kind: ConfigKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<Config>>, DiscoveryError>;

    /// Get a single object.
    fn get(&self, kind: ConfigKind, name: &str, namespace: &str) -> Option<Arc<Config>>;

    /// Whether the store has completed its initial sync.
    fn has_synced(&self) -> bool;

    /// Register a handler for changes to objects of `kind`.
    fn register_event_handler(&self, kind: ConfigKind, handler: EventHandler);
}

/// An ordered composition of backing stores.
///
/// List operations concatenate the member stores' results in registration
/// order, which keeps output deterministic. Get returns the first hit.
/// Sync requires every member to be synced.
#[derive(Clone, Default)]
pub struct AggregateStore {
    stores: Vec<Arc<dyn ConfigStore>>,
}

impl AggregateStore {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a backing store. Order is significant.
    pub fn add_store(&mut self, store: Arc<dyn ConfigStore>) {
        self.stores.push(store);
    }

    /// Number of composed stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no stores have been added.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl ConfigStore for AggregateStore {
    fn list(
        &self,
        kind: ConfigKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<Config>>, DiscoveryError> {
        let mut out = Vec::new();
        for store in &self.stores {
            out.extend(store.list(kind, namespace)?);
        }
        Ok(out)
    }

    fn get(&self, kind: ConfigKind, name: &str, namespace: &str) -> Option<Arc<Config>> {
        self.stores
            .iter()
            .find_map(|s| s.get(kind, name, namespace))
    }

    fn has_synced(&self) -> bool {
        self.stores.iter().all(|s| s.has_synced())
    }

    fn register_event_handler(&self, kind: ConfigKind, handler: EventHandler) {
        for store in &self.stores {
            store.register_event_handler(kind, Arc::clone(&handler));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use mesh_core::{ConfigMeta, ConfigSpec, GatewaySpec};

    fn gateway(name: &str, namespace: &str) -> Config {
        Config {
            meta: ConfigMeta::new(ConfigKind::Gateway, name, namespace),
            spec: ConfigSpec::Gateway(GatewaySpec::default()),
        }
    }

    #[test]
    fn list_concatenates_in_order() {
        let first = Arc::new(MemoryStore::new());
        let second = Arc::new(MemoryStore::new());
        first.apply(gateway("a", "ns"));
        second.apply(gateway("b", "ns"));

        let mut agg = AggregateStore::new();
        agg.add_store(first);
        agg.add_store(second);

        let names: Vec<_> = agg
            .list(ConfigKind::Gateway, None)
            .unwrap()
            .iter()
            .map(|c| c.meta.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn get_returns_first_hit() {
        let first = Arc::new(MemoryStore::new());
        let second = Arc::new(MemoryStore::new());
        let mut shadowed = gateway("same", "ns");
        shadowed.meta.resource_version = "from-first".into();
        first.apply(shadowed);
        let mut other = gateway("same", "ns");
        other.meta.resource_version = "from-second".into();
        second.apply(other);

        let mut agg = AggregateStore::new();
        agg.add_store(first);
        agg.add_store(second);

        let hit = agg.get(ConfigKind::Gateway, "same", "ns").unwrap();
        assert_eq!(hit.meta.resource_version, "from-first");
    }

    #[test]
    fn synced_requires_all_members() {
        let synced = Arc::new(MemoryStore::new());
        let unsynced = Arc::new(MemoryStore::new_unsynced());

        let mut agg = AggregateStore::new();
        agg.add_store(synced);
        assert!(agg.has_synced());

        agg.add_store(unsynced.clone());
        assert!(!agg.has_synced());

        unsynced.mark_synced();
        assert!(agg.has_synced());
    }

    #[test]
    fn empty_aggregate_is_synced() {
        assert!(AggregateStore::new().has_synced());
    }
}
