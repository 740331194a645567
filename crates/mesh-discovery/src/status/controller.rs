//! Aggregation of distribution reports and status reconciliation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use mesh_core::{ResourceKey, Unstructured};

use super::report::DistributionReport;

/// Distribution progress for one resource: how many instances acked it
/// out of how many exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Instances that acknowledged the resource version.
    pub acked: usize,
    /// Total instances.
    pub total: usize,
}

impl Progress {
    fn plus_equals(&mut self, other: Progress) {
        self.acked += other.acked;
        self.total += other.total;
    }
}

/// Errors from the object store behind status writes.
#[derive(Debug, thiserror::Error)]
pub enum StatusStoreError {
    /// The object is gone (410).
    #[error("resource gone")]
    Gone,
    /// The object does not exist (404).
    #[error("resource not found")]
    NotFound,
    /// The write hit a conflicting concurrent update (409).
    #[error("write conflict")]
    Conflict,
    /// Any other store failure.
    #[error("store error: {0}")]
    Other(String),
}

/// Narrow interface over the object store holding status subresources.
/// The Kubernetes dynamic client (or any equivalent) lives outside this
/// workspace.
pub trait StatusStore: Send + Sync {
    /// Fetch the live object for a tracked resource.
    fn get_resource(&self, key: &ResourceKey) -> Result<Unstructured, StatusStoreError>;

    /// Write the object's status subresource.
    fn update_status(&self, key: &ResourceKey, object: Unstructured)
        -> Result<(), StatusStoreError>;
}

/// Hooks the discovery server invokes as proxies request, ack, and
/// disconnect. The reporter side (building [`DistributionReport`]s from
/// these events) runs with the data-plane controller.
pub trait StatusEventReporter: Send + Sync {
    /// A request or ack was observed for (connection, type) with the
    /// given nonce or version.
    fn register_event(&self, conn_id: &str, type_url: &str, nonce: &str);

    /// A connection went away; its per-type state should be released.
    fn register_disconnect(&self, conn_id: &str, type_urls: &[&str]);
}

struct TrackedResource {
    key: ResourceKey,
    per_reporter: HashMap<String, Progress>,
}

/// Aggregates reports and reconciles object status on a fixed tick.
pub struct DistributionController {
    state: RwLock<HashMap<String, TrackedResource>>,
    observation_time: RwLock<HashMap<String, Instant>>,
    // Keyed write lock: one in-flight status write per resource.
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    store: Arc<dyn StatusStore>,
    update_interval: Duration,
    stale_interval: Duration,
}

impl DistributionController {
    /// Create a controller over a status store.
    pub fn new(
        store: Arc<dyn StatusStore>,
        update_interval: Duration,
        stale_interval: Duration,
    ) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            observation_time: RwLock::new(HashMap::new()),
            write_locks: Mutex::new(HashMap::new()),
            store,
            update_interval,
            stale_interval,
        }
    }

    /// Ingest one report. Malformed resource keys are skipped.
    pub fn handle_report(&self, report: DistributionReport) {
        let mut state = self.state.write().expect("state lock poisoned");
        for (key_str, acked) in &report.in_progress_resources {
            let Some(key) = ResourceKey::parse(key_str) else {
                warn!(key = %key_str, reporter = %report.reporter, "malformed resource key in report");
                continue;
            };
            let canonical = key.to_key_string();
            let entry = state.entry(canonical).or_insert_with(|| TrackedResource {
                key: key.clone(),
                per_reporter: HashMap::new(),
            });
            // Reports for a newer object version replace the tracked
            // version; the write path prunes on mismatch with the live
            // object.
            if key.resource_version.is_some() {
                entry.key = key;
            }
            entry.per_reporter.insert(
                report.reporter.clone(),
                Progress {
                    acked: *acked,
                    total: report.data_plane_count,
                },
            );
        }
        drop(state);

        self.observation_time
            .write()
            .expect("observation lock poisoned")
            .insert(report.reporter, Instant::now());
    }

    /// Run the reconcile loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.update_interval, "starting distribution status controller");
        let mut tick = tokio::time::interval(self.update_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("distribution status controller stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One reconcile pass: sum fresh reporters per resource, write
    /// status where it changed, evict stale reporters.
    pub async fn tick(&self) {
        let now = Instant::now();
        let mut stale: Vec<String> = Vec::new();
        let mut work: Vec<(ResourceKey, Progress)> = Vec::new();

        {
            let observation = self
                .observation_time
                .read()
                .expect("observation lock poisoned");
            let state = self.state.read().expect("state lock poisoned");
            for tracked in state.values() {
                let mut summed = Progress::default();
                for (reporter, progress) in &tracked.per_reporter {
                    let fresh = observation
                        .get(reporter)
                        .map(|seen| now.duration_since(*seen) <= self.stale_interval)
                        .unwrap_or(false);
                    if fresh {
                        summed.plus_equals(*progress);
                    } else if !stale.contains(reporter) {
                        warn!(reporter = %reporter, "status reporter went silent, dropping its reports");
                        stale.push(reporter.clone());
                    }
                }
                // All-stale resources produce no write this tick.
                if summed.total > 0 {
                    work.push((tracked.key.clone(), summed));
                }
            }
        }
        // Locks released before any store I/O.

        for (key, progress) in work {
            self.write_status(key, progress).await;
        }

        if !stale.is_empty() {
            self.remove_stale_reporters(&stale);
        }
    }

    async fn write_status(&self, key: ResourceKey, progress: Progress) {
        let canonical = key.to_key_string();
        let lock = {
            let mut locks = self.write_locks.lock().expect("write lock table poisoned");
            Arc::clone(
                locks
                    .entry(canonical.clone())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        let mut object = match self.store.get_resource(&key) {
            Ok(object) => object,
            Err(StatusStoreError::Gone) | Err(StatusStoreError::NotFound) => {
                // The object was deleted; prune its state and move on.
                self.prune(&canonical);
                return;
            }
            Err(err) => {
                warn!(resource = %canonical, error = %err, "failed to read resource for status");
                return;
            }
        };

        if let Some(reported_version) = &key.resource_version {
            if object.resource_version() != Some(reported_version.as_str()) {
                // The reports describe an old object version.
                self.prune(&canonical);
                return;
            }
        }

        let (needs_reconcile, desired) = reconcile_statuses(object.status(), progress);
        if !needs_reconcile {
            return;
        }

        object.set_status(desired);
        match self.store.update_status(&key, object) {
            Ok(()) => {
                debug!(resource = %canonical, acked = progress.acked, total = progress.total, "status reconciled");
            }
            Err(StatusStoreError::Conflict) => {
                // Someone else wrote meanwhile; the next tick retries.
                debug!(resource = %canonical, "status write conflict, will retry");
            }
            Err(StatusStoreError::Gone) | Err(StatusStoreError::NotFound) => {
                self.prune(&canonical);
            }
            Err(err) => {
                warn!(resource = %canonical, error = %err, "status write failed, will retry");
            }
        }
    }

    fn prune(&self, canonical: &str) {
        self.state
            .write()
            .expect("state lock poisoned")
            .remove(canonical);
        self.write_locks
            .lock()
            .expect("write lock table poisoned")
            .remove(canonical);
    }

    fn remove_stale_reporters(&self, stale: &[String]) {
        let mut state = self.state.write().expect("state lock poisoned");
        for tracked in state.values_mut() {
            for reporter in stale {
                tracked.per_reporter.remove(reporter);
            }
        }
        drop(state);

        let mut observation = self
            .observation_time
            .write()
            .expect("observation lock poisoned");
        for reporter in stale {
            observation.remove(reporter);
        }
    }

    /// Number of tracked resources, for the debug surface.
    pub fn tracked_resources(&self) -> usize {
        self.state.read().expect("state lock poisoned").len()
    }
}

/// Compute the desired status for a resource and whether it differs from
/// the current one. The status carries a single condition of type
/// `Reconciled`, true exactly when every instance acked.
fn reconcile_statuses(current: Option<&Value>, desired: Progress) -> (bool, Value) {
    let desired_condition = json!({
        "type": "Reconciled",
        "status": if desired.acked == desired.total { "True" } else { "False" },
        "message": format!("{}/{} proxies up to date.", desired.acked, desired.total),
    });

    let mut status = match current {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        // Unexpected status content is overwritten.
        _ => json!({}),
    };

    let conditions = status
        .as_object_mut()
        .expect("status is an object")
        .entry("conditions")
        .or_insert_with(|| json!([]));
    if !conditions.is_array() {
        *conditions = json!([]);
    }
    let conditions = conditions.as_array_mut().expect("conditions is an array");

    let index = conditions
        .iter()
        .position(|c| c.get("type").and_then(Value::as_str) == Some("Reconciled"));

    let needs_reconcile = match index {
        Some(i) => {
            conditions[i].get("message") != desired_condition.get("message")
                || conditions[i].get("status") != desired_condition.get("status")
        }
        None => true,
    };

    match index {
        Some(i) => conditions[i] = desired_condition,
        None => conditions.push(desired_condition),
    }

    (needs_reconcile, status)
}
