//! The configuration object model.
//!
//! A [`Config`] pairs common metadata ([`ConfigMeta`]) with a typed,
//! kind-specific payload ([`ConfigSpec`]). Values handed out by stores are
//! immutable; callers that intend to mutate must deep-copy first (specs
//! are `Clone` for exactly that reason).

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::host::Hostname;
use crate::key::ConfigKey;
use crate::kind::ConfigKind;
use crate::service::ServicePort;
use crate::visibility::Visibility;

/// Label map. Kept ordered so renderings are stable across runs.
pub type Labels = BTreeMap<String, String>;

/// Whether `labels` satisfies `selector` (selector is a subset of labels).
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}

/// Metadata common to every configuration object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigMeta {
    /// Object kind.
    pub kind: ConfigKind,
    /// Object name.
    pub name: String,
    /// Owning namespace.
    pub namespace: String,
    /// Object labels.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    /// Workload selector; absent means the object applies to all
    /// workloads in scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<Labels>,
    /// Visibility set; empty means the mesh default applies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_to: Vec<Visibility>,
    /// Creation timestamp, used for deterministic ordering.
    pub creation_time: SystemTime,
    /// Opaque version of the stored object.
    #[serde(default)]
    pub resource_version: String,
}

impl ConfigMeta {
    /// Create metadata with defaults for the optional fields.
    pub fn new(kind: ConfigKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            labels: Labels::new(),
            workload_selector: None,
            export_to: Vec::new(),
            creation_time: SystemTime::UNIX_EPOCH,
            resource_version: String::new(),
        }
    }
}

/// A configuration object: metadata plus a kind-specific spec.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Common metadata.
    pub meta: ConfigMeta,
    /// Kind-specific payload.
    pub spec: ConfigSpec,
}

impl Config {
    /// The object's identifying key.
    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(
            self.meta.kind,
            self.meta.name.clone(),
            self.meta.namespace.clone(),
        )
    }
}

/// Kind-specific configuration payloads.
///
/// Kinds the core does not interpret (the gateway-API kinds before
/// translation, and custom resources) carry an unstructured payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSpec {
    /// A service registry entry.
    Service {
        /// Service hostname.
        hostname: Hostname,
        /// Exposed ports.
        ports: Vec<ServicePort>,
        /// Externally reachable addresses per cluster.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        cluster_external_addresses: BTreeMap<String, Vec<String>>,
    },
    /// Routing rules bound to hosts and gateways.
    VirtualService(VirtualServiceSpec),
    /// Per-host traffic policy and subsets.
    DestinationRule(DestinationRuleSpec),
    /// Gateway server definition.
    Gateway(GatewaySpec),
    /// Sidecar visibility scope.
    Sidecar(SidecarSpec),
    /// Opaque proxy filter patches.
    EnvoyFilter(EnvoyFilterSpec),
    /// Authentication policy.
    AuthnPolicy(AuthnPolicySpec),
    /// Authorization policy.
    AuthzPolicy(AuthzPolicySpec),
    /// Secret material reference.
    Secret(SecretSpec),
    /// A workload registered into the mesh by hand.
    WorkloadEntry(WorkloadEntrySpec),
    /// Uninterpreted payload (gateway-API kinds, custom resources).
    Unstructured(crate::unstructured::Unstructured),
}

/// Routing rules for one or more hosts, optionally bound to gateways.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VirtualServiceSpec {
    /// Hosts the rules apply to.
    pub hosts: Vec<Hostname>,
    /// Gateways the rules bind to; empty means the implicit mesh gateway.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// HTTP route rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<RouteRule>,
    /// TCP route rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp: Vec<RouteRule>,
    /// TLS route rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<RouteRule>,
}

/// The reserved gateway name binding a virtual service to sidecars.
pub const MESH_GATEWAY: &str = "mesh";

impl VirtualServiceSpec {
    /// Gateways this spec binds to, with the implicit mesh gateway applied
    /// when none are named.
    pub fn bound_gateways(&self) -> Vec<String> {
        if self.gateways.is_empty() {
            vec![MESH_GATEWAY.to_string()]
        } else {
            self.gateways.clone()
        }
    }

    /// Every destination referenced from any route, in declaration order.
    pub fn destinations(&self) -> Vec<&Destination> {
        let mut out = Vec::new();
        for rule in self.http.iter().chain(&self.tcp).chain(&self.tls) {
            out.extend(rule.destinations.iter());
            if let Some(mirror) = &rule.mirror {
                out.push(mirror);
            }
        }
        out
    }
}

/// One route rule: a weighted destination set plus an optional mirror.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RouteRule {
    /// Route destinations.
    pub destinations: Vec<Destination>,
    /// Traffic mirror target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<Destination>,
}

/// A route destination.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Destination {
    /// Destination host.
    pub host: Hostname,
    /// Subset name within the destination rule, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    /// Destination port override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Per-host traffic policy and subsets.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DestinationRuleSpec {
    /// Host the rule applies to.
    pub host: Hostname,
    /// Base traffic policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_policy: Option<TrafficPolicy>,
    /// Named subsets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsets: Vec<Subset>,
}

/// Traffic policy knobs the core carries through opaquely.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficPolicy {
    /// Load balancer algorithm name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<String>,
    /// Maximum connections to the upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// A labeled subset of a destination's endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    /// Subset name, referenced from route destinations.
    pub name: String,
    /// Endpoint selector labels.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// Gateway server definition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GatewaySpec {
    /// Workload selector choosing the gateway proxies.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub selector: Labels,
    /// Servers exposed by the gateway.
    pub servers: Vec<GatewayServer>,
}

/// One server block of a gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayServer {
    /// Server name.
    pub name: String,
    /// Listening port.
    pub port: u16,
    /// Hosts served.
    pub hosts: Vec<Hostname>,
}

/// Sidecar scope restricting which services a proxy sees.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SidecarSpec {
    /// Egress host patterns, as `namespace/host` with `*` wildcards on
    /// either side.
    pub egress: Vec<SidecarEgress>,
}

/// One egress listener of a sidecar scope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SidecarEgress {
    /// Host patterns of the form `namespace/hostname`.
    pub hosts: Vec<String>,
}

/// Opaque proxy filter patches. The core tracks them for scoping and
/// change detection; rendering interprets them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EnvoyFilterSpec {
    /// Patch application priority; lower applies first.
    #[serde(default)]
    pub priority: i64,
    /// Uninterpreted patch bodies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_patches: Vec<serde_json::Value>,
}

/// Mutual-TLS mode of an authentication policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MtlsMode {
    /// Inherit from the next wider scope.
    #[default]
    Unset,
    /// Require mutual TLS.
    Strict,
    /// Accept both plaintext and mutual TLS.
    Permissive,
    /// Disable mutual TLS.
    Disable,
}

/// Peer/request authentication policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthnPolicySpec {
    /// Mutual-TLS mode.
    #[serde(default)]
    pub mtls_mode: MtlsMode,
}

/// Action of an authorization policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthzAction {
    /// Allow matching requests.
    #[default]
    Allow,
    /// Deny matching requests.
    Deny,
}

/// Authorization policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthzPolicySpec {
    /// Policy action.
    #[serde(default)]
    pub action: AuthzAction,
    /// Match rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AuthzRule>,
}

/// One rule of an authorization policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthzRule {
    /// Source principals the rule matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    /// Operation paths the rule matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Secret material reference; issuance is external.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Resource names the secret applies to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_refs: Vec<String>,
}

/// A workload registered into the mesh by hand.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkloadEntrySpec {
    /// Workload address.
    pub address: String,
    /// Workload labels.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    /// Service account the workload runs as.
    #[serde(default)]
    pub service_account: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_subset_semantics() {
        let mut selector = Labels::new();
        selector.insert("app".into(), "web".into());

        let mut labels = Labels::new();
        labels.insert("app".into(), "web".into());
        labels.insert("version".into(), "v2".into());

        assert!(selector_matches(&selector, &labels));
        assert!(selector_matches(&Labels::new(), &labels));

        selector.insert("tier".into(), "front".into());
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn implicit_mesh_gateway() {
        let vs = VirtualServiceSpec {
            hosts: vec!["web.test".into()],
            ..Default::default()
        };
        assert_eq!(vs.bound_gateways(), vec![MESH_GATEWAY.to_string()]);
    }

    #[test]
    fn destinations_include_mirrors() {
        let vs = VirtualServiceSpec {
            hosts: vec!["web.test".into()],
            http: vec![RouteRule {
                destinations: vec![Destination {
                    host: "backend.test".into(),
                    subset: None,
                    port: None,
                }],
                mirror: Some(Destination {
                    host: "shadow.test".into(),
                    subset: None,
                    port: None,
                }),
            }],
            ..Default::default()
        };
        let hosts: Vec<_> = vs.destinations().iter().map(|d| d.host.as_str()).collect();
        assert_eq!(hosts, vec!["backend.test", "shadow.test"]);
    }

    #[test]
    fn config_key_from_meta() {
        let config = Config {
            meta: ConfigMeta::new(ConfigKind::Gateway, "edge", "prod"),
            spec: ConfigSpec::Gateway(GatewaySpec::default()),
        };
        assert_eq!(config.key().to_string(), "gateway/prod/edge");
    }

    #[test]
    fn manifest_round_trip_is_stable() {
        let mut meta = ConfigMeta::new(ConfigKind::DestinationRule, "reviews", "bookinfo");
        meta.labels.insert("app".into(), "reviews".into());
        let config = Config {
            meta,
            spec: ConfigSpec::DestinationRule(DestinationRuleSpec {
                host: "reviews.bookinfo.svc.cluster.local".into(),
                traffic_policy: Some(TrafficPolicy {
                    load_balancer: Some("ROUND_ROBIN".into()),
                    max_connections: None,
                }),
                subsets: vec![Subset {
                    name: "v2".into(),
                    labels: [("version".to_string(), "v2".to_string())]
                        .into_iter()
                        .collect(),
                }],
            }),
        };

        // Parse-then-render must be a fixpoint under canonical
        // formatting, and repeated renderings byte-identical.
        let first = serde_yaml::to_string(&config).unwrap();
        let reparsed: Config = serde_yaml::from_str(&first).unwrap();
        let second = serde_yaml::to_string(&reparsed).unwrap();
        assert_eq!(first, second);
        assert_eq!(reparsed.key(), config.key());
    }
}
