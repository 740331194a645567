//! Connections and the live connection table.
//!
//! A [`Connection`] is one logical session with a proxy: identity,
//! stream send half, push-event channel, and the shared [`Proxy`] record.
//! The table is guarded by a reader-writer lock: push dispatch and debug
//! readers take the read lock, connect/disconnect take the write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, error, info};

use mesh_proto::DiscoveryResponse;
use mesh_push::{Proxy, PushQueue, PushRequest};

use crate::metrics::DiscoveryMetrics;
use crate::stream::StreamSender;

/// A push handed to a connection's main loop, with the guard that
/// releases the queue slot (and the throttle permit) once the push has
/// been processed - or once the event is dropped because the connection
/// went away.
pub struct PushEvent {
    /// The merged request to push.
    pub request: PushRequest,
    /// Release-on-drop bookkeeping.
    pub guard: PushGuard,
}

/// Releases the per-connection queue slot and the push-throttle permit.
pub struct PushGuard {
    queue: Arc<PushQueue>,
    conn_id: String,
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
}

impl PushGuard {
    /// Create a guard for a dequeued push.
    pub fn new(
        queue: Arc<PushQueue>,
        conn_id: String,
        permit: Option<tokio::sync::OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            queue,
            conn_id,
            _permit: permit,
        }
    }
}

impl Drop for PushGuard {
    fn drop(&mut self) {
        self.queue.mark_done(&self.conn_id);
    }
}

/// One logical session with a connected proxy.
pub struct Connection {
    /// Client address, from the network layer.
    pub peer_addr: String,
    /// Authenticated identities; empty when unauthenticated.
    pub identities: Vec<String>,
    /// Time of connection, for debugging.
    pub connect_time: Instant,
    /// Connection id, `{node-id}-{seq}`; the connection table key.
    pub conn_id: String,
    /// The proxy this connection serves.
    pub proxy: Arc<Proxy>,
    /// Push events for the main loop. Capacity one: the dispatcher does
    /// not hand over the next push until `done` fires.
    push_tx: mpsc::Sender<PushEvent>,
    sender: Arc<dyn StreamSender>,
}

impl Connection {
    /// Assemble a connection after the first request identified the
    /// node. Returns the connection and the push-event receiver for the
    /// main loop.
    pub fn new(
        peer_addr: String,
        identities: Vec<String>,
        conn_id: String,
        proxy: Arc<Proxy>,
        sender: Arc<dyn StreamSender>,
    ) -> (Arc<Connection>, mpsc::Receiver<PushEvent>) {
        let (push_tx, push_rx) = mpsc::channel(1);
        let connection = Arc::new(Connection {
            peer_addr,
            identities,
            connect_time: Instant::now(),
            conn_id,
            proxy,
            push_tx,
            sender,
        });
        (connection, push_rx)
    }

    /// Deliver a push event to the main loop. Fails when the connection
    /// is gone; the event's guard then releases the slot on drop.
    pub async fn deliver_push(&self, event: PushEvent) -> Result<(), ()> {
        self.push_tx.send(event).await.map_err(|_| ())
    }

    /// Send a response with a hard deadline.
    ///
    /// On success the sent nonce/version/size are recorded under the
    /// proxy lock. On deadline the response counts as failed and the
    /// caller tears the connection down.
    pub async fn send(
        &self,
        response: DiscoveryResponse,
        timeout: std::time::Duration,
        metrics: &DiscoveryMetrics,
    ) -> Result<(), Status> {
        let type_url = response.type_url.clone();
        let version = response.version_info.clone();
        let nonce = response.nonce.clone();
        let size = response.payload_size();

        match tokio::time::timeout(timeout, self.sender.send(response)).await {
            Err(_) => {
                info!(conn = %self.conn_id, type_url = %type_url, "timeout writing response");
                metrics.record_send_timeout(&type_url);
                Err(Status::deadline_exceeded("timeout sending"))
            }
            Ok(Err(status)) => Err(status),
            Ok(Ok(())) => {
                if !nonce.is_empty() {
                    self.proxy.record_sent(&type_url, &version, &nonce, size);
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("conn_id", &self.conn_id)
            .field("peer_addr", &self.peer_addr)
            .field("proxy", &self.proxy.id)
            .finish()
    }
}

/// The live connection table.
pub struct ConnectionTable {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    next_id: AtomicU64,
    metrics: DiscoveryMetrics,
}

impl ConnectionTable {
    /// Create an empty table.
    pub fn new(metrics: DiscoveryMetrics) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            metrics,
        }
    }

    /// Allocate a connection id for a node: `{node-id}-{seq}`.
    pub fn next_conn_id(&self, node_id: &str) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{node_id}-{seq}")
    }

    /// Register a connection.
    pub fn add(&self, connection: Arc<Connection>) {
        let mut table = self.connections.write().expect("connection table poisoned");
        table.insert(connection.conn_id.clone(), Arc::clone(&connection));
        self.metrics.proxy_connected();
        info!(conn = %connection.conn_id, peer = %connection.peer_addr, "new connection");
    }

    /// Remove a connection by id.
    pub fn remove(&self, conn_id: &str) {
        let mut table = self.connections.write().expect("connection table poisoned");
        if table.remove(conn_id).is_none() {
            error!(conn = %conn_id, "removing connection for non-existent node");
            self.metrics.record_internal_error();
        } else {
            self.metrics.proxy_disconnected();
            debug!(conn = %conn_id, "connection removed");
        }
    }

    /// Look up a connection.
    pub fn get(&self, conn_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("connection table poisoned")
            .get(conn_id)
            .cloned()
    }

    /// Snapshot of all live connections.
    pub fn list(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .expect("connection table poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .expect("connection table poisoned")
            .len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the connection of a proxy by cluster and IP, for targeted
    /// proxy updates. The proxy may well be connected to a different
    /// replica, in which case there is nothing to do here.
    pub fn find_by_cluster_and_ip(&self, cluster_id: &str, ip: &str) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .expect("connection table poisoned")
            .values()
            .find(|c| {
                c.proxy.metadata.cluster_id == cluster_id
                    && c.proxy.ip_addresses.first().map(String::as_str) == Some(ip)
            })
            .cloned()
    }
}
