//! # mesh-push
//!
//! The push-context snapshot engine and the push pipeline plumbing.
//!
//! This crate materializes a consistent, read-mostly view of mesh policy
//! ([`PushContext`]) and owns the pieces that move configuration change
//! toward connected proxies:
//!
//! - [`PushContext`] - immutable per-push snapshot with incremental
//!   refresh keyed by what changed
//! - [`SidecarScope`] - per-namespace projection limiting what a proxy
//!   sees, with the dependency set used to skip irrelevant pushes
//! - [`PushRequest`] - the unit flowing through debounce and fan-out,
//!   with its merge law
//! - [`run_debounce`] - burst coalescing with quiet-period and max-delay
//!   bounds
//! - [`PushQueue`] - bounded per-connection queue with merge-on-enqueue
//! - [`Environment`] - stores, mesh config, and the atomically swapped
//!   global snapshot slot

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod debounce;
mod env;
mod proxy;
mod queue;
mod request;
mod sidecar;

pub use context::{
    qualify_gateway, status_metrics, ProcessedDestRules, ProxyPushStatus, PushContext,
};
pub use debounce::{run_debounce, DebounceOptions};
pub use env::{Environment, MeshConfig};
pub use proxy::{Locality, Proxy, ProxyMetadata, ProxyType, WatchedResource};
pub use queue::PushQueue;
pub use request::{PushRequest, TriggerReason};
pub use sidecar::SidecarScope;
