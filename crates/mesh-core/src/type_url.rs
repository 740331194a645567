//! Type URL handling for discovery resources.

use std::fmt;

/// Type URL wrapper for discovery resource types.
///
/// Type URLs identify the protobuf message type carried in a discovery
/// response. Responses for the standard types are pushed in the fixed
/// order given by [`TypeUrl::PUSH_ORDER`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeUrl(String);

impl TypeUrl {
    /// Type URL for clusters (CDS).
    pub const CLUSTER: &'static str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

    /// Type URL for endpoints (EDS).
    pub const ENDPOINT: &'static str =
        "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

    /// Type URL for listeners (LDS).
    pub const LISTENER: &'static str = "type.googleapis.com/envoy.config.listener.v3.Listener";

    /// Type URL for routes (RDS).
    pub const ROUTE: &'static str =
        "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

    /// Type URL for secrets (SDS).
    pub const SECRET: &'static str =
        "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

    /// The fixed order types are rendered in within a single push. Types
    /// not listed here are pushed after these, in watch order.
    pub const PUSH_ORDER: &'static [&'static str] = &[
        Self::CLUSTER,
        Self::ENDPOINT,
        Self::LISTENER,
        Self::ROUTE,
        Self::SECRET,
    ];

    /// Create a new type URL from a string.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The type URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for logging (`CDS`, `EDS`, ...).
    pub fn short_name(url: &str) -> &str {
        match url {
            Self::CLUSTER => "CDS",
            Self::ENDPOINT => "EDS",
            Self::LISTENER => "LDS",
            Self::ROUTE => "RDS",
            Self::SECRET => "SDS",
            other => other,
        }
    }

    /// Lower-case form used as a metric label, to bound cardinality.
    pub fn metric_name(url: &str) -> &str {
        match url {
            Self::CLUSTER => "cds",
            Self::ENDPOINT => "eds",
            Self::LISTENER => "lds",
            Self::ROUTE => "rds",
            Self::SECRET => "sds",
            other => other,
        }
    }
}

impl fmt::Display for TypeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeUrl {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeUrl {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TypeUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names() {
        assert_eq!(TypeUrl::short_name(TypeUrl::CLUSTER), "CDS");
        assert_eq!(TypeUrl::short_name(TypeUrl::ENDPOINT), "EDS");
        assert_eq!(TypeUrl::short_name("custom.type"), "custom.type");
    }

    #[test]
    fn push_order_is_fixed() {
        assert_eq!(
            TypeUrl::PUSH_ORDER,
            &[
                TypeUrl::CLUSTER,
                TypeUrl::ENDPOINT,
                TypeUrl::LISTENER,
                TypeUrl::ROUTE,
                TypeUrl::SECRET,
            ]
        );
    }

    #[test]
    fn metric_names_are_bounded() {
        assert_eq!(TypeUrl::metric_name(TypeUrl::SECRET), "sds");
    }
}
