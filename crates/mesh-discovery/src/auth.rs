//! Stream authentication hooks and identity checking.
//!
//! Certificate verification and identity extraction are external
//! collaborators; the server invokes them through the [`Authenticator`]
//! trait. When the identity check is enabled, at least one authenticated
//! SPIFFE identity must match the namespace and service account the
//! proxy claims in its metadata.

use mesh_core::DiscoveryError;

/// What the transport layer knows about a new stream.
#[derive(Clone, Debug)]
pub struct AuthContext {
    /// Client address, from the network layer.
    pub peer_addr: String,
}

/// Authenticates a stream and extracts its identities.
///
/// `Ok(None)` means the stream is unauthenticated but allowed (plaintext
/// deployments); `Ok(Some(ids))` carries the verified identities; an
/// error fails the stream with `Unauthenticated`.
pub trait Authenticator: Send + Sync {
    /// Authenticate one stream.
    fn authenticate(&self, ctx: &AuthContext) -> Result<Option<Vec<String>>, DiscoveryError>;
}

/// A parsed SPIFFE identity, `spiffe://{domain}/ns/{namespace}/sa/{account}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpiffeIdentity {
    /// Trust domain.
    pub trust_domain: String,
    /// Workload namespace.
    pub namespace: String,
    /// Workload service account.
    pub service_account: String,
}

impl SpiffeIdentity {
    /// Parse a SPIFFE URI. Returns `None` for anything else.
    pub fn parse(id: &str) -> Option<SpiffeIdentity> {
        let rest = id.strip_prefix("spiffe://")?;
        let mut parts = rest.splitn(5, '/');
        let trust_domain = parts.next()?;
        if parts.next()? != "ns" {
            return None;
        }
        let namespace = parts.next()?;
        if parts.next()? != "sa" {
            return None;
        }
        let service_account = parts.next()?;
        if trust_domain.is_empty() || namespace.is_empty() || service_account.is_empty() {
            return None;
        }
        Some(SpiffeIdentity {
            trust_domain: trust_domain.to_string(),
            namespace: namespace.to_string(),
            service_account: service_account.to_string(),
        })
    }
}

/// Verify that one of the stream's identities matches the claimed
/// namespace and service account. Unparseable identities are skipped;
/// empty claims match anything.
pub fn check_connection_identity(
    identities: &[String],
    namespace: &str,
    service_account: &str,
) -> Result<(), DiscoveryError> {
    for raw in identities {
        let Some(id) = SpiffeIdentity::parse(raw) else {
            continue;
        };
        if !namespace.is_empty() && id.namespace != namespace {
            continue;
        }
        if !service_account.is_empty() && id.service_account != service_account {
            continue;
        }
        return Ok(());
    }
    Err(DiscoveryError::IdentityMismatch {
        namespace: namespace.to_string(),
        service_account: service_account.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spiffe() {
        let id = SpiffeIdentity::parse("spiffe://cluster.local/ns/prod/sa/web").unwrap();
        assert_eq!(id.trust_domain, "cluster.local");
        assert_eq!(id.namespace, "prod");
        assert_eq!(id.service_account, "web");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(SpiffeIdentity::parse("https://cluster.local/ns/prod/sa/web").is_none());
        assert!(SpiffeIdentity::parse("spiffe://cluster.local/prod/web").is_none());
        assert!(SpiffeIdentity::parse("spiffe://cluster.local/ns//sa/web").is_none());
    }

    #[test]
    fn identity_match() {
        let ids = vec!["spiffe://cluster.local/ns/prod/sa/web".to_string()];
        assert!(check_connection_identity(&ids, "prod", "web").is_ok());
        assert!(check_connection_identity(&ids, "prod", "").is_ok());
        assert!(check_connection_identity(&ids, "staging", "web").is_err());
        assert!(check_connection_identity(&ids, "prod", "db").is_err());
    }

    #[test]
    fn unparseable_identities_are_skipped() {
        let ids = vec![
            "garbage".to_string(),
            "spiffe://cluster.local/ns/prod/sa/web".to_string(),
        ];
        assert!(check_connection_identity(&ids, "prod", "web").is_ok());
    }

    #[test]
    fn no_identities_fails() {
        assert!(check_connection_identity(&[], "prod", "web").is_err());
    }
}
