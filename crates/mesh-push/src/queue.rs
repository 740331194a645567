//! The per-connection push queue.
//!
//! One slot per connection with merge-on-enqueue: while a connection has
//! a pending request, further enqueues merge into it instead of growing
//! the queue. A connection being processed is parked in an in-progress
//! set; requests that arrive meanwhile are stashed there and re-queued
//! when the dispatcher marks the push done. This enforces strict
//! per-connection push ordering and bounds memory to one pending request
//! per connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::request::PushRequest;

#[derive(Default)]
struct QueueState {
    /// Connections with a pending request, in arrival order.
    order: VecDeque<String>,
    /// Pending request per queued connection.
    pending: HashMap<String, PushRequest>,
    /// Connections currently being pushed; the value holds any request
    /// that arrived during processing.
    in_progress: HashMap<String, Option<PushRequest>>,
}

/// A push queue over connection ids.
#[derive(Default)]
pub struct PushQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl PushQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request for a connection, merging with any pending one.
    pub fn enqueue(&self, conn_id: &str, req: PushRequest) {
        let mut state = self.state.lock().expect("queue lock poisoned");

        if let Some(stashed) = state.in_progress.get_mut(conn_id) {
            // A push for this connection is running; stash for later.
            *stashed = Some(match stashed.take() {
                Some(pending) => pending.merge(req),
                None => req,
            });
            return;
        }

        match state.pending.remove(conn_id) {
            Some(pending) => {
                state.pending.insert(conn_id.to_string(), pending.merge(req));
            }
            None => {
                state.order.push_back(conn_id.to_string());
                state.pending.insert(conn_id.to_string(), req);
            }
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Dequeue the next (connection, request) pair, waiting until one is
    /// available. The connection is marked in-progress until
    /// [`PushQueue::mark_done`].
    pub async fn dequeue(&self) -> (String, PushRequest) {
        loop {
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if let Some(conn_id) = state.order.pop_front() {
                    let req = state
                        .pending
                        .remove(&conn_id)
                        .expect("queued connection has a pending request");
                    state.in_progress.insert(conn_id.clone(), None);
                    return (conn_id, req);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark a dequeued push finished. A request stashed during processing
    /// is re-queued, preserving per-connection ordering.
    pub fn mark_done(&self, conn_id: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        let stashed = state.in_progress.remove(conn_id).flatten();
        if let Some(req) = stashed {
            state.order.push_back(conn_id.to_string());
            state.pending.insert(conn_id.to_string(), req);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Drop all queued state for a connection (on disconnect).
    pub fn remove(&self, conn_id: &str) {
        let mut state = self.state.lock().expect("queue lock poisoned");
        state.order.retain(|id| id != conn_id);
        state.pending.remove(conn_id);
        state.in_progress.remove(conn_id);
    }

    /// Number of connections with a pending request.
    pub fn pending(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TriggerReason;
    use mesh_core::{ConfigKey, ConfigKind};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn req(name: &str) -> PushRequest {
        PushRequest::for_config(
            ConfigKey::new(ConfigKind::VirtualService, name, "ns"),
            TriggerReason::Config,
        )
    }

    #[tokio::test]
    async fn fifo_across_connections() {
        let queue = PushQueue::new();
        queue.enqueue("a", req("1"));
        queue.enqueue("b", req("2"));

        let (first, _) = queue.dequeue().await;
        let (second, _) = queue.dequeue().await;
        assert_eq!(first, "a");
        assert_eq!(second, "b");
    }

    #[tokio::test]
    async fn merge_on_enqueue() {
        let queue = PushQueue::new();
        queue.enqueue("a", req("1"));
        queue.enqueue("a", req("2"));
        assert_eq!(queue.pending(), 1);

        let (_, merged) = queue.dequeue().await;
        assert_eq!(merged.configs_updated.len(), 2);
    }

    #[tokio::test]
    async fn requests_during_processing_are_stashed() {
        let queue = PushQueue::new();
        queue.enqueue("a", req("1"));

        let (conn, _) = queue.dequeue().await;
        assert_eq!(conn, "a");

        // Arrives while "a" is being pushed: not directly dequeueable.
        queue.enqueue("a", req("2"));
        queue.enqueue("a", req("3"));
        assert_eq!(queue.pending(), 0);

        queue.mark_done("a");
        let (conn, merged) = queue.dequeue().await;
        assert_eq!(conn, "a");
        assert_eq!(merged.configs_updated.len(), 2);
    }

    #[tokio::test]
    async fn mark_done_without_stash_clears_connection() {
        let queue = PushQueue::new();
        queue.enqueue("a", req("1"));
        let _ = queue.dequeue().await;
        queue.mark_done("a");
        assert_eq!(queue.pending(), 0);

        // Next enqueue flows normally.
        queue.enqueue("a", req("2"));
        let (conn, _) = queue.dequeue().await;
        assert_eq!(conn, "a");
    }

    #[tokio::test]
    async fn dequeue_waits_for_work() {
        let queue = Arc::new(PushQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("late", req("1"));

        let (conn, _) = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dequeue must wake")
            .unwrap();
        assert_eq!(conn, "late");
    }

    #[tokio::test]
    async fn remove_discards_state() {
        let queue = PushQueue::new();
        queue.enqueue("gone", req("1"));
        queue.remove("gone");
        assert_eq!(queue.pending(), 0);

        // An in-progress connection can be removed too.
        queue.enqueue("a", req("1"));
        let _ = queue.dequeue().await;
        queue.enqueue("a", req("2"));
        queue.remove("a");
        queue.mark_done("a");
        assert_eq!(queue.pending(), 0);
    }
}
