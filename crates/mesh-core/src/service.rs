//! The service model.
//!
//! Services are derived from registry configs of kind `service`. Invariant:
//! for any (hostname, namespace) at most one service exists.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::host::Hostname;
use crate::visibility::Visibility;

/// Port protocol. UDP ports are excluded from service-account indexing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Plain TCP.
    Tcp,
    /// UDP.
    Udp,
    /// HTTP/1.1.
    Http,
    /// HTTP/2 (including gRPC).
    Http2,
    /// gRPC over HTTP/2.
    Grpc,
    /// TLS passthrough.
    Tls,
    /// Mongo wire protocol.
    Mongo,
    /// Unrecognized protocol, treated as opaque TCP.
    Unsupported,
}

impl Protocol {
    /// Parse a protocol name, case-insensitively.
    pub fn parse(s: &str) -> Protocol {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Protocol::Tcp,
            "UDP" => Protocol::Udp,
            "HTTP" => Protocol::Http,
            "HTTP2" => Protocol::Http2,
            "GRPC" => Protocol::Grpc,
            "TLS" | "HTTPS" => Protocol::Tls,
            "MONGO" => Protocol::Mongo,
            _ => Protocol::Unsupported,
        }
    }
}

/// A named service port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// Port name.
    pub name: String,
    /// Port number.
    pub port: u16,
    /// Protocol served on this port.
    pub protocol: Protocol,
}

/// A service in the mesh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Service {
    /// Fully qualified hostname.
    pub hostname: Hostname,
    /// Owning namespace.
    pub namespace: String,
    /// Ports exposed by the service.
    pub ports: Vec<ServicePort>,
    /// Visibility set; empty means the mesh default applies.
    pub export_to: Vec<Visibility>,
    /// Creation timestamp, used for deterministic ordering.
    pub creation_time: SystemTime,
    /// Optional externally reachable addresses, per cluster name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cluster_external_addresses: HashMap<String, Vec<String>>,
}

impl Service {
    /// Create a service with the given hostname and namespace and no
    /// ports.
    pub fn new(hostname: impl Into<Hostname>, namespace: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            namespace: namespace.into(),
            ports: Vec::new(),
            export_to: Vec::new(),
            creation_time: SystemTime::UNIX_EPOCH,
            cluster_external_addresses: HashMap::new(),
        }
    }

    /// Add a port.
    pub fn with_port(mut self, name: &str, port: u16, protocol: Protocol) -> Self {
        self.ports.push(ServicePort {
            name: name.to_string(),
            port,
            protocol,
        });
        self
    }

    /// Set the exportTo set.
    pub fn with_export_to(mut self, export_to: Vec<Visibility>) -> Self {
        self.export_to = export_to;
        self
    }

    /// Set the creation time.
    pub fn with_creation_time(mut self, t: SystemTime) -> Self {
        self.creation_time = t;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parse() {
        assert_eq!(Protocol::parse("grpc"), Protocol::Grpc);
        assert_eq!(Protocol::parse("HTTPS"), Protocol::Tls);
        assert_eq!(Protocol::parse("quic"), Protocol::Unsupported);
    }

    #[test]
    fn builder_chain() {
        let svc = Service::new("web.prod.svc.cluster.local", "prod")
            .with_port("http", 80, Protocol::Http)
            .with_export_to(vec![Visibility::Public]);
        assert_eq!(svc.ports.len(), 1);
        assert_eq!(svc.export_to, vec![Visibility::Public]);
    }
}
