//! Error types for discovery operations.
//!
//! [`DiscoveryError`] covers the failure modes of the server core and maps
//! onto gRPC status codes. Errors that compromise a single push are
//! absorbed at the connection level; errors that compromise a snapshot are
//! absorbed at the debouncer level; only process-level errors terminate
//! the server.

/// Error type for discovery server operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The server has not finished syncing its caches; streams are
    /// rejected until it has.
    #[error("server is not ready to serve discovery information")]
    NotReady,

    /// The first request on a stream did not carry a node id.
    #[error("missing node ID")]
    MissingNodeId,

    /// Node metadata could not be parsed.
    #[error("invalid node metadata: {reason}")]
    InvalidMetadata {
        /// Why the metadata was rejected.
        reason: String,
    },

    /// The stream's identities did not match the claimed proxy identity.
    #[error("authorization failed: no identity matched {namespace}/{service_account}")]
    IdentityMismatch {
        /// Namespace the proxy claimed.
        namespace: String,
        /// Service account the proxy claimed.
        service_account: String,
    },

    /// The authenticator rejected the stream.
    #[error("authentication failed: {reason}")]
    Unauthenticated {
        /// Why authentication failed.
        reason: String,
    },

    /// A backing store could not be read while building a snapshot.
    #[error("store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
        /// Underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A response send did not complete within the deadline.
    #[error("timeout sending {type_url}")]
    SendTimeout {
        /// Type URL of the response that timed out.
        type_url: String,
    },

    /// The stream closed with an unexpected error.
    #[error("stream closed: {reason}")]
    StreamClosed {
        /// Reason for closure.
        reason: String,
    },

    /// A generator failed to render resources for one type.
    #[error("generator failed for {type_url}: {message}")]
    Generator {
        /// Type URL being generated.
        type_url: String,
        /// Error message.
        message: String,
    },

    /// A status write hit a conflict or a vanished object.
    #[error("status write for {resource} failed: {reason}")]
    StatusWrite {
        /// Key of the object being written.
        resource: String,
        /// Why the write failed.
        reason: String,
    },

    /// Invalid server configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Underlying error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DiscoveryError {
    /// Create a store error from any error type.
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error from any error type.
    pub fn internal<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Map each error variant onto the gRPC status code a stream should fail
/// with.
impl From<DiscoveryError> for tonic::Status {
    fn from(err: DiscoveryError) -> Self {
        match &err {
            DiscoveryError::NotReady => tonic::Status::unavailable(err.to_string()),
            DiscoveryError::MissingNodeId | DiscoveryError::InvalidMetadata { .. } => {
                tonic::Status::invalid_argument(err.to_string())
            }
            DiscoveryError::Unauthenticated { .. } | DiscoveryError::IdentityMismatch { .. } => {
                tonic::Status::unauthenticated(err.to_string())
            }
            DiscoveryError::Store { .. } => tonic::Status::unavailable(err.to_string()),
            DiscoveryError::SendTimeout { .. } => {
                tonic::Status::deadline_exceeded(err.to_string())
            }
            DiscoveryError::StreamClosed { .. } => tonic::Status::unavailable(err.to_string()),
            DiscoveryError::Generator { .. }
            | DiscoveryError::StatusWrite { .. }
            | DiscoveryError::Internal { .. } => tonic::Status::internal(err.to_string()),
            DiscoveryError::Configuration(_) => tonic::Status::invalid_argument(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_are_invalid_argument() {
        let status: tonic::Status = DiscoveryError::MissingNodeId.into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn auth_errors_are_unauthenticated() {
        let status: tonic::Status = DiscoveryError::Unauthenticated {
            reason: "no certificate".into(),
        }
        .into();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn send_timeout_is_deadline_exceeded() {
        let status: tonic::Status = DiscoveryError::SendTimeout {
            type_url: "t".into(),
        }
        .into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);
    }

    #[test]
    fn not_ready_is_unavailable() {
        let status: tonic::Status = DiscoveryError::NotReady.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
