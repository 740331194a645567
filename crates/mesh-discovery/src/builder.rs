//! Builder for configuring and creating the discovery server.

use std::sync::Arc;

use mesh_core::DiscoveryError;
use mesh_push::{Environment, MeshConfig};
use mesh_registry::ConfigStore;

use crate::auth::Authenticator;
use crate::config::DiscoveryConfig;
use crate::generator::{GeneratorRegistry, ResourceGenerator};
use crate::server::DiscoveryServer;
use crate::status::StatusEventReporter;

/// Builder for a [`DiscoveryServer`].
///
/// # Example
///
/// ```rust,ignore
/// let server = DiscoveryServer::builder()
///     .store(store)
///     .mesh_config(MeshConfig::default())
///     .generator(TypeUrl::CLUSTER, cluster_generator)
///     .build()?;
/// ```
#[derive(Default)]
pub struct DiscoveryServerBuilder {
    store: Option<Arc<dyn ConfigStore>>,
    mesh: MeshConfig,
    config: DiscoveryConfig,
    generators: GeneratorRegistry,
    authenticator: Option<Arc<dyn Authenticator>>,
    status_reporter: Option<Arc<dyn StatusEventReporter>>,
    control_plane_id: Option<String>,
}

impl DiscoveryServerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the aggregated config store. Required.
    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the mesh configuration.
    pub fn mesh_config(mut self, mesh: MeshConfig) -> Self {
        self.mesh = mesh;
        self
    }

    /// Set the server configuration.
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a generator under a type URL or `{flavor}/{type-url}`
    /// key.
    pub fn generator(
        mut self,
        key: impl Into<String>,
        generator: Arc<dyn ResourceGenerator>,
    ) -> Self {
        self.generators.register(key, generator);
        self
    }

    /// Set the fallback generator.
    pub fn default_generator(mut self, generator: Arc<dyn ResourceGenerator>) -> Self {
        self.generators.set_default(generator);
        self
    }

    /// Set the stream authenticator.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Set the distribution status event sink.
    pub fn status_reporter(mut self, reporter: Arc<dyn StatusEventReporter>) -> Self {
        self.status_reporter = Some(reporter);
        self
    }

    /// Set the control-plane identifier attached to responses.
    pub fn control_plane_id(mut self, id: impl Into<String>) -> Self {
        self.control_plane_id = Some(id.into());
        self
    }

    /// Build the server.
    ///
    /// # Errors
    ///
    /// Returns an error if no store was provided.
    pub fn build(self) -> Result<DiscoveryServer, DiscoveryError> {
        let store = self
            .store
            .ok_or_else(|| DiscoveryError::Configuration("config store is required".into()))?;

        let env = Arc::new(Environment::new(store, self.mesh));
        let control_plane_id = self
            .control_plane_id
            .unwrap_or_else(|| format!("meshd-{}", env!("CARGO_PKG_VERSION")));

        Ok(DiscoveryServer::assemble(
            env,
            self.config,
            self.generators,
            self.authenticator,
            self.status_reporter,
            control_plane_id,
        ))
    }
}

impl DiscoveryServer {
    /// Create a builder.
    pub fn builder() -> DiscoveryServerBuilder {
        DiscoveryServerBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_registry::MemoryStore;

    #[test]
    fn builder_requires_store() {
        assert!(DiscoveryServerBuilder::new().build().is_err());
    }

    #[test]
    fn builder_defaults() {
        let server = DiscoveryServer::builder()
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        assert!(server.is_server_ready());
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn unsynced_store_blocks_readiness() {
        let server = DiscoveryServer::builder()
            .store(Arc::new(MemoryStore::new_unsynced()))
            .build()
            .unwrap();
        assert!(!server.is_server_ready());
    }
}
