//! In-memory config store.
//!
//! Backs embedders and tests. Objects are keyed by (kind, namespace,
//! name); handlers fire synchronously from the writer's task, matching
//! the contract informer-backed stores provide.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::debug;

use mesh_core::{Config, ConfigKind, DiscoveryError};

use crate::event::{ConfigEvent, EventHandler};
use crate::store::ConfigStore;

/// A thread-safe in-memory config store.
pub struct MemoryStore {
    // BTreeMap keeps per-kind listings deterministic.
    configs: DashMap<ConfigKind, BTreeMap<(String, String), Arc<Config>>>,
    handlers: Mutex<Vec<(ConfigKind, EventHandler)>>,
    synced: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store that reports synced immediately.
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
            handlers: Mutex::new(Vec::new()),
            synced: AtomicBool::new(true),
        }
    }

    /// Create a store that reports unsynced until [`MemoryStore::mark_synced`].
    pub fn new_unsynced() -> Self {
        let store = Self::new();
        store.synced.store(false, Ordering::SeqCst);
        store
    }

    /// Mark the initial sync complete.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    /// Insert or replace an object, firing add/update handlers.
    pub fn apply(&self, config: Config) {
        let key = (config.meta.namespace.clone(), config.meta.name.clone());
        let config = Arc::new(config);
        let previous = self
            .configs
            .entry(config.meta.kind)
            .or_default()
            .insert(key, Arc::clone(&config));

        let event = if previous.is_some() {
            ConfigEvent::Update
        } else {
            ConfigEvent::Add
        };
        debug!(key = %config.key(), event = %event, "config applied");
        self.notify(&config, event);
    }

    /// Remove an object, firing delete handlers if it existed.
    pub fn delete(&self, kind: ConfigKind, name: &str, namespace: &str) {
        let removed = self
            .configs
            .get_mut(&kind)
            .and_then(|mut m| m.remove(&(namespace.to_string(), name.to_string())));
        if let Some(config) = removed {
            debug!(key = %config.key(), "config deleted");
            self.notify(&config, ConfigEvent::Delete);
        }
    }

    /// Total object count across kinds.
    pub fn len(&self) -> usize {
        self.configs.iter().map(|e| e.value().len()).sum()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, config: &Config, event: ConfigEvent) {
        // Clone the matching handlers out so the lock is not held while
        // user code runs.
        let handlers: Vec<EventHandler> = {
            let registered = self.handlers.lock().expect("handler lock poisoned");
            registered
                .iter()
                .filter(|(kind, _)| *kind == config.meta.kind)
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };
        for handler in handlers {
            handler(config, event);
        }
    }
}

impl ConfigStore for MemoryStore {
    fn list(
        &self,
        kind: ConfigKind,
        namespace: Option<&str>,
    ) -> Result<Vec<Arc<Config>>, DiscoveryError> {
        Ok(match self.configs.get(&kind) {
            Some(by_key) => by_key
                .values()
                .filter(|c| namespace.map_or(true, |ns| c.meta.namespace == ns))
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    fn get(&self, kind: ConfigKind, name: &str, namespace: &str) -> Option<Arc<Config>> {
        self.configs
            .get(&kind)?
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn register_event_handler(&self, kind: ConfigKind, handler: EventHandler) {
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .push((kind, handler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::{ConfigMeta, ConfigSpec, GatewaySpec, VirtualServiceSpec};
    use std::sync::atomic::AtomicUsize;

    fn vs(name: &str, namespace: &str) -> Config {
        Config {
            meta: ConfigMeta::new(ConfigKind::VirtualService, name, namespace),
            spec: ConfigSpec::VirtualService(VirtualServiceSpec::default()),
        }
    }

    #[test]
    fn apply_get_delete() {
        let store = MemoryStore::new();
        store.apply(vs("reviews", "bookinfo"));

        let hit = store.get(ConfigKind::VirtualService, "reviews", "bookinfo");
        assert!(hit.is_some());

        store.delete(ConfigKind::VirtualService, "reviews", "bookinfo");
        assert!(store
            .get(ConfigKind::VirtualService, "reviews", "bookinfo")
            .is_none());
    }

    #[test]
    fn list_filters_by_namespace() {
        let store = MemoryStore::new();
        store.apply(vs("a", "ns1"));
        store.apply(vs("b", "ns2"));

        assert_eq!(store.list(ConfigKind::VirtualService, None).unwrap().len(), 2);
        assert_eq!(
            store.list(ConfigKind::VirtualService, Some("ns1")).unwrap().len(),
            1
        );
        assert!(store.list(ConfigKind::Gateway, None).unwrap().is_empty());
    }

    #[test]
    fn list_order_is_deterministic() {
        let store = MemoryStore::new();
        store.apply(vs("b", "ns"));
        store.apply(vs("a", "ns"));

        let names: Vec<_> = store
            .list(ConfigKind::VirtualService, None)
            .unwrap()
            .iter()
            .map(|c| c.meta.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn handlers_fire_synchronously() {
        let store = MemoryStore::new();
        let adds = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));

        let (a, d) = (Arc::clone(&adds), Arc::clone(&deletes));
        store.register_event_handler(
            ConfigKind::VirtualService,
            Arc::new(move |_, event| match event {
                ConfigEvent::Add | ConfigEvent::Update => {
                    a.fetch_add(1, Ordering::SeqCst);
                }
                ConfigEvent::Delete => {
                    d.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        store.apply(vs("x", "ns"));
        store.apply(vs("x", "ns"));
        store.delete(ConfigKind::VirtualService, "x", "ns");

        assert_eq!(adds.load(Ordering::SeqCst), 2);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_only_fire_for_registered_kind() {
        let store = MemoryStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        store.register_event_handler(
            ConfigKind::Gateway,
            Arc::new(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        store.apply(vs("x", "ns"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        store.apply(Config {
            meta: ConfigMeta::new(ConfigKind::Gateway, "gw", "ns"),
            spec: ConfigSpec::Gateway(GatewaySpec::default()),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
