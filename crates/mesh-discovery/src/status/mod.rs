//! Distribution status tracking.
//!
//! Data-plane controllers publish [`DistributionReport`]s describing how
//! many of their proxies have absorbed each tracked resource version.
//! The [`DistributionController`] aggregates reports across reporters
//! and reconciles each object's status subresource with a single
//! `Reconciled` condition.

mod controller;
mod report;

pub use controller::{
    DistributionController, Progress, StatusEventReporter, StatusStore, StatusStoreError,
};
pub use report::{DistributionReport, REPORT_DATA_FIELD, REPORT_LABEL};
