//! # mesh-proto
//!
//! Wire protocol types for the meshd discovery server.
//!
//! Types are generated at build time from the vendored protos under
//! `proto/` using `tonic-build`. Resource payloads are carried as
//! `prost_types::Any`; the server treats them as opaque bytes produced
//! by generators.

#![allow(missing_docs)]

// Re-export prost types for convenience.
pub use prost::Message;
pub use prost_types::Any;

mod generated {
    #![allow(clippy::all)]
    tonic::include_proto!("mesh.discovery.v1");
}

pub use generated::aggregated_discovery_service_client::AggregatedDiscoveryServiceClient;
pub use generated::aggregated_discovery_service_server::{
    AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
};
pub use generated::{
    ControlPlane, DeltaDiscoveryRequest, DeltaDiscoveryResponse, DeltaResource,
    DiscoveryRequest, DiscoveryResponse, ErrorDetail, Locality, Node,
};

impl DiscoveryRequest {
    /// Whether this request rejects the response it acknowledges.
    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

impl DiscoveryResponse {
    /// Total payload size of the wrapped resources, in bytes.
    pub fn payload_size(&self) -> usize {
        self.resources.iter().map(|r| r.value.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nack_detection() {
        let mut req = DiscoveryRequest::default();
        assert!(!req.is_nack());
        req.error_detail = Some(ErrorDetail {
            code: 3,
            message: "rejected".to_string(),
        });
        assert!(req.is_nack());
    }

    #[test]
    fn payload_size_sums_resources() {
        let res = DiscoveryResponse {
            resources: vec![
                Any {
                    type_url: "t".to_string(),
                    value: vec![0; 16],
                },
                Any {
                    type_url: "t".to_string(),
                    value: vec![0; 8],
                },
            ],
            ..Default::default()
        };
        assert_eq!(res.payload_size(), 24);
    }

    #[test]
    fn request_round_trips_through_encoding() {
        let req = DiscoveryRequest {
            version_info: "v1".to_string(),
            type_url: "type.googleapis.com/test".to_string(),
            response_nonce: "n1".to_string(),
            resource_names: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };
        let bytes = req.encode_to_vec();
        let decoded = DiscoveryRequest::decode(bytes.as_slice()).unwrap();
        assert_eq!(req, decoded);
    }
}
