//! The closed set of configuration kinds tracked by the discovery server.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a mesh configuration object.
///
/// The set is closed: change events, push scoping, and the incremental
/// snapshot rebuild all switch on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigKind {
    /// A mesh service (registry entry with hostname and ports).
    Service,
    /// Endpoints backing a service.
    ServiceEndpoints,
    /// Routing rules bound to hosts and gateways.
    VirtualService,
    /// Per-host traffic policy and subsets.
    DestinationRule,
    /// A mesh gateway (ingress/egress server definition).
    Gateway,
    /// A sidecar scope restricting proxy visibility.
    Sidecar,
    /// An opaque proxy filter patch.
    EnvoyFilter,
    /// Peer/request authentication policy.
    AuthnPolicy,
    /// Authorization policy.
    AuthzPolicy,
    /// TLS secret material reference.
    Secret,
    /// A non-Kubernetes workload registered into the mesh.
    WorkloadEntry,
    /// gateway-API HTTPRoute.
    HttpRoute,
    /// gateway-API TCPRoute.
    TcpRoute,
    /// gateway-API Gateway.
    KubeGateway,
    /// gateway-API GatewayClass.
    GatewayClass,
}

impl ConfigKind {
    /// All kinds, in a stable order.
    pub const ALL: &'static [ConfigKind] = &[
        ConfigKind::Service,
        ConfigKind::ServiceEndpoints,
        ConfigKind::VirtualService,
        ConfigKind::DestinationRule,
        ConfigKind::Gateway,
        ConfigKind::Sidecar,
        ConfigKind::EnvoyFilter,
        ConfigKind::AuthnPolicy,
        ConfigKind::AuthzPolicy,
        ConfigKind::Secret,
        ConfigKind::WorkloadEntry,
        ConfigKind::HttpRoute,
        ConfigKind::TcpRoute,
        ConfigKind::KubeGateway,
        ConfigKind::GatewayClass,
    ];

    /// The canonical kebab-case name, used in keys and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Service => "service",
            ConfigKind::ServiceEndpoints => "endpoint",
            ConfigKind::VirtualService => "virtual-service",
            ConfigKind::DestinationRule => "destination-rule",
            ConfigKind::Gateway => "gateway",
            ConfigKind::Sidecar => "sidecar",
            ConfigKind::EnvoyFilter => "envoy-filter",
            ConfigKind::AuthnPolicy => "authn-policy",
            ConfigKind::AuthzPolicy => "authz-policy",
            ConfigKind::Secret => "secret",
            ConfigKind::WorkloadEntry => "workload-entry",
            ConfigKind::HttpRoute => "http-route",
            ConfigKind::TcpRoute => "tcp-route",
            ConfigKind::KubeGateway => "kube-gateway",
            ConfigKind::GatewayClass => "gateway-class",
        }
    }

    /// Parse the canonical kebab-case name.
    pub fn parse(s: &str) -> Option<ConfigKind> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Whether objects of this kind are translated into virtual services
    /// or gateways by the gateway-API layer.
    pub fn is_gateway_api(&self) -> bool {
        matches!(
            self,
            ConfigKind::HttpRoute
                | ConfigKind::TcpRoute
                | ConfigKind::KubeGateway
                | ConfigKind::GatewayClass
        )
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for kind in ConfigKind::ALL {
            assert_eq!(ConfigKind::parse(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn parse_unknown() {
        assert_eq!(ConfigKind::parse("not-a-kind"), None);
    }

    #[test]
    fn gateway_api_kinds() {
        assert!(ConfigKind::HttpRoute.is_gateway_api());
        assert!(ConfigKind::GatewayClass.is_gateway_api());
        assert!(!ConfigKind::VirtualService.is_gateway_api());
    }
}
