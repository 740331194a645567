//! The proxy model and per-type watched-resource state.
//!
//! A [`Proxy`] is the server-side record of one connected data-plane
//! instance: identity, metadata, labels, and the per-type-URL watch state
//! that the ack/nack machine reads and writes. The watched-resources map
//! sits behind its own reader-writer lock; the connection's main loop and
//! the send path both touch it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use mesh_core::{DiscoveryError, Labels, TypeUrl};

use crate::context::PushContext;
use crate::sidecar::SidecarScope;

/// What kind of workload the proxy fronts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyType {
    /// A sidecar next to a workload; visibility is scoped.
    Sidecar,
    /// A standalone gateway; sees gateway-bound config.
    Router,
}

impl ProxyType {
    fn parse(s: &str) -> Option<ProxyType> {
        match s {
            "sidecar" => Some(ProxyType::Sidecar),
            "router" => Some(ProxyType::Router),
            _ => None,
        }
    }
}

/// Locality of the proxy, used for locality-aware balancing downstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Locality {
    /// Region.
    pub region: String,
    /// Zone.
    pub zone: String,
    /// Sub-zone.
    pub sub_zone: String,
}

/// Node metadata the server interprets. Everything else in the node
/// metadata map is carried through opaquely for generators.
#[derive(Clone, Debug, Default)]
pub struct ProxyMetadata {
    /// Generator flavor requested by the node; selects a generator
    /// registry namespace.
    pub generator: String,
    /// Cluster the proxy belongs to.
    pub cluster_id: String,
    /// Service account the workload runs as.
    pub service_account: String,
    /// Namespace override.
    pub namespace: String,
    /// Workload labels.
    pub labels: Labels,
    /// All raw metadata entries.
    pub raw: HashMap<String, String>,
}

impl ProxyMetadata {
    /// Parse the recognized keys out of a node metadata map.
    pub fn parse(raw: HashMap<String, String>) -> Result<ProxyMetadata, DiscoveryError> {
        let mut labels = Labels::new();
        if let Some(encoded) = raw.get("LABELS") {
            for pair in encoded.split(',').filter(|p| !p.is_empty()) {
                let (k, v) = pair.split_once('=').ok_or_else(|| {
                    DiscoveryError::InvalidMetadata {
                        reason: format!("malformed label entry {pair:?}"),
                    }
                })?;
                labels.insert(k.to_string(), v.to_string());
            }
        }
        Ok(ProxyMetadata {
            generator: raw.get("GENERATOR").cloned().unwrap_or_default(),
            cluster_id: raw.get("CLUSTER_ID").cloned().unwrap_or_default(),
            service_account: raw.get("SERVICE_ACCOUNT").cloned().unwrap_or_default(),
            namespace: raw.get("NAMESPACE").cloned().unwrap_or_default(),
            labels,
            raw,
        })
    }
}

/// Per-(connection, type-URL) watch state.
///
/// Invariant: `nonce_sent == nonce_acked` exactly when the client has
/// fully acknowledged the last response for this type.
#[derive(Clone, Debug, Default)]
pub struct WatchedResource {
    /// Type URL being watched.
    pub type_url: String,
    /// Resource names from the last request; empty means wildcard.
    pub resource_names: Vec<String>,
    /// Version of the last response sent.
    pub version_sent: String,
    /// Nonce of the last response sent.
    pub nonce_sent: String,
    /// Version the client last acknowledged.
    pub version_acked: String,
    /// Nonce the client last acknowledged.
    pub nonce_acked: String,
    /// When the last response was sent.
    pub last_sent: Option<Instant>,
    /// Payload size of the last response, in bytes.
    pub last_size: usize,
}

impl WatchedResource {
    /// Fresh watch state for a type.
    pub fn new(type_url: impl Into<String>, resource_names: Vec<String>) -> Self {
        Self {
            type_url: type_url.into(),
            resource_names,
            ..Default::default()
        }
    }
}

/// Server-side record of a connected proxy.
#[derive(Debug)]
pub struct Proxy {
    /// Stable node id (`sidecar~10.0.0.1~web-a1b2.prod~prod.svc.cluster.local`).
    pub id: String,
    /// Proxy type parsed from the node id.
    pub proxy_type: ProxyType,
    /// Namespace whose config the proxy consumes.
    pub config_namespace: String,
    /// IP addresses of the workload.
    pub ip_addresses: Vec<String>,
    /// Interpreted node metadata.
    pub metadata: ProxyMetadata,
    /// Workload labels (from metadata).
    pub labels: Labels,
    /// Locality, from the registry or the node message.
    pub locality: RwLock<Option<Locality>>,
    /// Per-type watch state.
    watched: RwLock<HashMap<String, WatchedResource>>,
    /// Precomputed sidecar scope for the current snapshot.
    sidecar_scope: RwLock<Option<Arc<SidecarScope>>>,
}

impl Proxy {
    /// Build a proxy from a node id and metadata map.
    ///
    /// Node ids have four `~`-separated segments:
    /// `{type}~{ip}~{name}.{namespace}~{dns-domain}`.
    pub fn from_node(
        node_id: &str,
        raw_metadata: HashMap<String, String>,
    ) -> Result<Proxy, DiscoveryError> {
        let parts: Vec<&str> = node_id.split('~').collect();
        if parts.len() != 4 {
            return Err(DiscoveryError::InvalidMetadata {
                reason: format!("node id {node_id:?} does not have 4 segments"),
            });
        }
        let proxy_type =
            ProxyType::parse(parts[0]).ok_or_else(|| DiscoveryError::InvalidMetadata {
                reason: format!("unknown proxy type {:?}", parts[0]),
            })?;
        let ip_addresses: Vec<String> = parts[1]
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if ip_addresses.is_empty() {
            return Err(DiscoveryError::InvalidMetadata {
                reason: "node id carries no IP address".to_string(),
            });
        }

        let metadata = ProxyMetadata::parse(raw_metadata)?;

        // Namespace: explicit metadata wins, else the suffix of the
        // workload segment.
        let config_namespace = if !metadata.namespace.is_empty() {
            metadata.namespace.clone()
        } else {
            parts[2]
                .rsplit_once('.')
                .map(|(_, ns)| ns.to_string())
                .unwrap_or_default()
        };
        if config_namespace.is_empty() {
            return Err(DiscoveryError::InvalidMetadata {
                reason: format!("cannot determine namespace from node id {node_id:?}"),
            });
        }

        let labels = metadata.labels.clone();
        Ok(Proxy {
            id: node_id.to_string(),
            proxy_type,
            config_namespace,
            ip_addresses,
            metadata,
            labels,
            locality: RwLock::new(None),
            watched: RwLock::new(HashMap::new()),
            sidecar_scope: RwLock::new(None),
        })
    }

    /// The watch state for a type, if any.
    pub fn watched(&self, type_url: &str) -> Option<WatchedResource> {
        self.watched
            .read()
            .expect("watched lock poisoned")
            .get(type_url)
            .cloned()
    }

    /// Initialize (or replace) the watch for a type.
    pub fn init_watch(&self, type_url: &str, resource_names: Vec<String>) {
        self.watched
            .write()
            .expect("watched lock poisoned")
            .insert(
                type_url.to_string(),
                WatchedResource::new(type_url, resource_names),
            );
    }

    /// Record an acknowledged response. Returns the resource names
    /// watched before this ack replaced them.
    pub fn record_ack(
        &self,
        type_url: &str,
        version: &str,
        nonce: &str,
        resource_names: Vec<String>,
    ) -> Vec<String> {
        let mut watched = self.watched.write().expect("watched lock poisoned");
        let entry = watched
            .entry(type_url.to_string())
            .or_insert_with(|| WatchedResource::new(type_url, Vec::new()));
        let previous = std::mem::replace(&mut entry.resource_names, resource_names);
        entry.version_acked = version.to_string();
        entry.nonce_acked = nonce.to_string();
        previous
    }

    /// Record a sent response under the proxy lock.
    pub fn record_sent(&self, type_url: &str, version: &str, nonce: &str, size: usize) {
        let mut watched = self.watched.write().expect("watched lock poisoned");
        let entry = watched
            .entry(type_url.to_string())
            .or_insert_with(|| WatchedResource::new(type_url, Vec::new()));
        entry.version_sent = version.to_string();
        entry.nonce_sent = nonce.to_string();
        entry.last_sent = Some(Instant::now());
        entry.last_size = size;
    }

    /// Nonce of the last response sent for a type.
    pub fn nonce_sent(&self, type_url: &str) -> String {
        self.watched(type_url).map(|w| w.nonce_sent).unwrap_or_default()
    }

    /// Nonce of the last response acked for a type.
    pub fn nonce_acked(&self, type_url: &str) -> String {
        self.watched(type_url)
            .map(|w| w.nonce_acked)
            .unwrap_or_default()
    }

    /// Whether the proxy watches a type.
    pub fn is_watching(&self, type_url: &str) -> bool {
        self.watched
            .read()
            .expect("watched lock poisoned")
            .contains_key(type_url)
    }

    /// All watched types, standard types first in the fixed push order,
    /// then any others in name order (to keep iteration deterministic).
    pub fn watched_ordered(&self) -> Vec<WatchedResource> {
        let watched = self.watched.read().expect("watched lock poisoned");
        let mut out = Vec::with_capacity(watched.len());
        for url in TypeUrl::PUSH_ORDER {
            if let Some(w) = watched.get(*url) {
                out.push(w.clone());
            }
        }
        let mut rest: Vec<&WatchedResource> = watched
            .values()
            .filter(|w| !TypeUrl::PUSH_ORDER.contains(&w.type_url.as_str()))
            .collect();
        rest.sort_by(|a, b| a.type_url.cmp(&b.type_url));
        out.extend(rest.into_iter().cloned());
        out
    }

    /// The sidecar scope computed for the current snapshot.
    pub fn sidecar_scope(&self) -> Option<Arc<SidecarScope>> {
        self.sidecar_scope
            .read()
            .expect("scope lock poisoned")
            .clone()
    }

    /// Recompute the sidecar scope against a snapshot. Called on connect
    /// and before every full push, since a config change may make a new
    /// sidecar config applicable.
    pub fn set_sidecar_scope(&self, push: &PushContext) {
        let scope = push.sidecar_scope_for(&self.config_namespace, &self.labels);
        *self.sidecar_scope.write().expect("scope lock poisoned") = Some(scope);
    }
}
