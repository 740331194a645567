//! # mesh-discovery
//!
//! The gRPC discovery server for meshd.
//!
//! This crate owns the control surface of the discovery core:
//!
//! - [`DiscoveryServer`] - stream sessions, the xDS ack/nack protocol
//!   state machine, and push dispatch over the bounded per-connection
//!   queue
//! - [`GeneratorRegistry`] - resolution of resource generators per
//!   (flavor, type-URL)
//! - [`DistributionController`] - aggregation of distribution reports
//!   and status reconciliation
//! - [`ReadinessGate`] - named probes behind `GET /ready`
//! - [`ShutdownController`] - drain-bounded graceful shutdown
//!
//! ## Example
//!
//! ```rust,ignore
//! use mesh_discovery::DiscoveryServer;
//! use mesh_registry::MemoryStore;
//! use std::sync::Arc;
//!
//! let server = DiscoveryServer::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()?;
//!
//! server.serve("[::]:15010".parse()?).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod builder;
mod config;
mod connection;
mod generator;
mod metrics;
mod ready;
mod server;
mod shutdown;
pub mod status;
pub mod stream;
mod utils;


pub use auth::{check_connection_identity, AuthContext, Authenticator, SpiffeIdentity};
pub use builder::DiscoveryServerBuilder;
pub use config::DiscoveryConfig;
pub use connection::{Connection, ConnectionTable, PushEvent, PushGuard};
pub use generator::{GeneratorRegistry, ResourceGenerator};
pub use metrics::DiscoveryMetrics;
pub use ready::{readiness_router, ReadinessGate};
pub use server::{AdsService, DiscoveryServer};
pub use shutdown::{wait_for_signal, ShutdownController, StreamGuard};
pub use status::{
    DistributionController, DistributionReport, Progress, StatusEventReporter, StatusStore,
    StatusStoreError,
};

use std::net::SocketAddr;

use mesh_proto::AggregatedDiscoveryServiceServer;
use tonic::transport::Server;
use tracing::info;

impl DiscoveryServer {
    /// The aggregated discovery service, ready to add to a tonic router.
    pub fn ads_service(&self) -> AggregatedDiscoveryServiceServer<AdsService> {
        AggregatedDiscoveryServiceServer::new(AdsService::new(self.clone()))
            .max_decoding_message_size(self.config().max_recv_message_size)
    }

    /// The HTTP router serving the readiness probe and the push-status
    /// debug endpoint.
    pub fn readiness_router(&self) -> axum::Router {
        let server = self.clone();
        readiness_router(std::sync::Arc::clone(self.readiness())).route(
            "/debug/push_status",
            axum::routing::get(move || {
                let server = server.clone();
                async move {
                    let status = server
                        .environment()
                        .last_push_status()
                        .map(|push| push.status_json())
                        .unwrap_or_else(|| serde_json::json!({}));
                    axum::Json(status)
                }
            }),
        )
    }

    /// Start the push pipeline and serve gRPC on `addr` until SIGTERM or
    /// SIGINT, then drain within the configured duration.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), tonic::transport::Error> {
        self.start();

        let mut builder = Server::builder()
            .concurrency_limit_per_connection(self.config().max_concurrent_streams as usize);
        if let Some(age) = self.config().max_connection_age {
            builder = builder.max_connection_age(age);
        }

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_service_status("", tonic_health::ServingStatus::Serving)
            .await;

        let shutdown = self.shutdown_controller().clone();
        let drain = self.config().drain_duration;

        info!(addr = %addr, "discovery server listening");
        builder
            .add_service(self.ads_service())
            .add_service(health_service)
            .serve_with_shutdown(addr, async move {
                wait_for_signal().await;
                health_reporter
                    .set_service_status("", tonic_health::ServingStatus::NotServing)
                    .await;
                shutdown.shutdown(drain).await;
            })
            .await
    }
}
