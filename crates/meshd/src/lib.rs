//! # meshd
//!
//! The core of a service-mesh discovery server: a control plane that
//! accepts long-lived streaming connections from data-plane proxies,
//! computes their desired configuration from an in-memory view of mesh
//! policy, and pushes updates as that view changes.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use meshd::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let server = DiscoveryServer::builder()
//!     .store(store.clone())
//!     .mesh_config(MeshConfig::default())
//!     .build()?;
//!
//! // Config changes flow: store -> debouncer -> snapshot -> push queue
//! // -> connected proxies.
//! server.serve("[::]:15010".parse()?).await?;
//! ```
//!
//! ## Architecture
//!
//! The workspace is organized into focused crates:
//!
//! - `mesh-core` - kinds, keys, hostnames, visibility, the config model
//! - `mesh-registry` - the config store trait and the aggregate registry
//! - `mesh-push` - push-context snapshots, sidecar scopes, debounce, the
//!   push queue
//! - `mesh-proto` - the wire protocol (generated from vendored protos)
//! - `mesh-discovery` - the gRPC server, protocol state machine, and
//!   distribution status tracking
//!
//! This crate re-exports the public API of all of them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use mesh_core as core;
pub use mesh_discovery as discovery;
pub use mesh_proto as proto;
pub use mesh_push as push;
pub use mesh_registry as registry;

/// Convenient imports for embedders.
pub mod prelude {
    pub use mesh_core::{
        Config, ConfigKey, ConfigKind, ConfigMeta, ConfigSpec, DiscoveryError, Hostname,
        Service, TypeUrl, Visibility,
    };
    pub use mesh_discovery::{
        DiscoveryConfig, DiscoveryServer, DiscoveryServerBuilder, DistributionController,
        DistributionReport, GeneratorRegistry, ReadinessGate, ResourceGenerator,
        ShutdownController,
    };
    pub use mesh_push::{
        DebounceOptions, Environment, MeshConfig, PushContext, PushRequest, SidecarScope,
        TriggerReason,
    };
    pub use mesh_registry::{AggregateStore, ConfigStore, MemoryStore};
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Version string for logs and the control-plane identifier.
    pub fn version_string() -> String {
        format!("meshd {VERSION}")
    }
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use std::sync::Arc;

    #[test]
    fn prelude_builds_a_server() {
        let store = Arc::new(MemoryStore::new());
        let server = DiscoveryServer::builder()
            .store(store)
            .mesh_config(MeshConfig::default())
            .build();
        assert!(server.is_ok());
    }

    #[test]
    fn version_string_mentions_crate() {
        assert!(super::version::version_string().starts_with("meshd "));
    }
}
