//! The environment: stores, mesh configuration, and the global snapshot
//! slot.
//!
//! The engine owns a single-slot, lock-swapped reference to the current
//! [`PushContext`]; readers clone the `Arc` and release it when done. A
//! second slot retains the last published context for debug surfacing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use mesh_core::{DiscoveryError, Visibility};
use mesh_registry::ConfigStore;

use crate::context::PushContext;
use crate::request::PushRequest;

/// Mesh-wide configuration the engine consults while building snapshots.
#[derive(Clone, Debug)]
pub struct MeshConfig {
    /// The distinguished namespace whose policies apply mesh-wide.
    pub root_namespace: String,
    /// Default visibility for services with an empty exportTo.
    pub default_service_export_to: HashSet<Visibility>,
    /// Default visibility for virtual services with an empty exportTo.
    pub default_virtual_service_export_to: HashSet<Visibility>,
    /// Default visibility for destination rules with an empty exportTo.
    pub default_destination_rule_export_to: HashSet<Visibility>,
    /// When set, gateway workloads only see gateways in their own
    /// namespace.
    pub scope_gateway_to_namespace: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            root_namespace: "mesh-system".to_string(),
            default_service_export_to: [Visibility::Public].into_iter().collect(),
            default_virtual_service_export_to: [Visibility::Public].into_iter().collect(),
            default_destination_rule_export_to: [Visibility::Public].into_iter().collect(),
            scope_gateway_to_namespace: false,
        }
    }
}

/// Shared environment handed to snapshot builds and stream setup.
pub struct Environment {
    store: Arc<dyn ConfigStore>,
    mesh: MeshConfig,
    push_context: RwLock<Arc<PushContext>>,
    last_push: Mutex<Option<Arc<PushContext>>>,
    version_counter: AtomicU64,
}

impl Environment {
    /// Create an environment over a store with the given mesh config.
    pub fn new(store: Arc<dyn ConfigStore>, mesh: MeshConfig) -> Self {
        Self {
            store,
            mesh,
            push_context: RwLock::new(Arc::new(PushContext::empty())),
            last_push: Mutex::new(None),
            version_counter: AtomicU64::new(0),
        }
    }

    /// The aggregated config store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Mesh configuration.
    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    /// Whether the backing stores have completed their initial sync.
    pub fn has_synced(&self) -> bool {
        self.store.has_synced()
    }

    /// The current snapshot. The swap is atomic: readers see either the
    /// old or the new context, never a partial one.
    pub fn global_push_context(&self) -> Arc<PushContext> {
        Arc::clone(&self.push_context.read().expect("push context lock poisoned"))
    }

    /// Publish a new snapshot and retain it in the last-push debug slot.
    pub fn set_push_context(&self, context: Arc<PushContext>) {
        context.update_metrics();
        *self.push_context.write().expect("push context lock poisoned") = Arc::clone(&context);
        *self.last_push.lock().expect("last push lock poisoned") = Some(context);
    }

    /// The most recently published snapshot, for the debug surface.
    pub fn last_push_status(&self) -> Option<Arc<PushContext>> {
        self.last_push.lock().expect("last push lock poisoned").clone()
    }

    /// Monotonic snapshot version: wall-clock millis plus a counter.
    pub fn next_version(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let count = self.version_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{millis}/{count}")
    }

    /// Build and publish a snapshot for `req`.
    ///
    /// A full request (or a missing/uninitialized old context) runs every
    /// init pass; otherwise the build is incremental over
    /// `req.configs_updated`. On error the previous snapshot is retained
    /// and the error is returned for the caller to absorb.
    pub fn update_push_context(
        &self,
        req: Option<&PushRequest>,
    ) -> Result<Arc<PushContext>, DiscoveryError> {
        let old = self.global_push_context();
        let old_ref = if old.init_done() { Some(&*old) } else { None };

        let mut fresh = PushContext::empty();
        if let Err(err) = fresh.init_context(self, old_ref, req) {
            warn!(error = %err, "failed to build push context, keeping previous snapshot");
            return Err(err);
        }

        let context = Arc::new(fresh);
        self.set_push_context(Arc::clone(&context));
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_registry::MemoryStore;

    #[test]
    fn versions_are_unique_and_increasing() {
        let env = Environment::new(Arc::new(MemoryStore::new()), MeshConfig::default());
        let a = env.next_version();
        let b = env.next_version();
        assert_ne!(a, b);
    }

    #[test]
    fn initial_context_is_uninitialized() {
        let env = Environment::new(Arc::new(MemoryStore::new()), MeshConfig::default());
        assert!(!env.global_push_context().init_done());
        assert!(env.last_push_status().is_none());
    }

    #[test]
    fn publish_swaps_pointer() {
        let env = Environment::new(Arc::new(MemoryStore::new()), MeshConfig::default());
        let built = env.update_push_context(None).unwrap();
        assert!(built.init_done());

        let current = env.global_push_context();
        assert!(Arc::ptr_eq(&built, &current));
        assert!(env.last_push_status().is_some());
    }
}
