//! # mesh-core
//!
//! Core types for the meshd discovery server.
//!
//! This crate provides the foundational vocabulary shared by the registry,
//! the push-context engine, and the gRPC server:
//!
//! - [`ConfigKind`] / [`ConfigKey`] - the closed kind set and the canonical
//!   (kind, namespace, name) identifier
//! - [`Hostname`] - FQDN handling with wildcard and most-specific matching
//! - [`Visibility`] - normalized exportTo semantics
//! - [`Config`] / [`ConfigMeta`] / [`ConfigSpec`] - the immutable config
//!   object model
//! - [`Service`] - the service model derived from the registry
//! - [`DiscoveryError`] - error taxonomy with gRPC status code mapping
//! - [`TypeUrl`] - type URL constants and helpers
//!
//! ## Example
//!
//! ```rust
//! use mesh_core::{ConfigKey, ConfigKind};
//!
//! let key = ConfigKey::new(ConfigKind::VirtualService, "reviews", "bookinfo");
//! assert_eq!(key.to_string(), "virtual-service/bookinfo/reviews");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod host;
mod key;
mod kind;
mod service;
mod type_url;
mod unstructured;
mod visibility;

pub use config::{
    selector_matches, AuthnPolicySpec, AuthzAction, AuthzPolicySpec, AuthzRule, Config,
    ConfigMeta, ConfigSpec, Destination, DestinationRuleSpec, EnvoyFilterSpec, GatewayServer,
    GatewaySpec, Labels, MtlsMode, RouteRule, SecretSpec, SidecarEgress, SidecarSpec, Subset,
    TrafficPolicy, VirtualServiceSpec, WorkloadEntrySpec, MESH_GATEWAY,
};
pub use error::DiscoveryError;
pub use host::{most_specific_host_match, sort_most_specific, Hostname};
pub use key::{ConfigKey, ResourceKey};
pub use kind::ConfigKind;
pub use service::{Protocol, Service, ServicePort};
pub use type_url::TypeUrl;
pub use unstructured::Unstructured;
pub use visibility::{exported_to, Visibility};

/// Result type alias using [`DiscoveryError`].
pub type Result<T> = std::result::Result<T, DiscoveryError>;
