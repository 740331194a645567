//! Shared helpers for the discovery server.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Global counter ensuring nonce uniqueness under concurrency.
static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique response nonce.
///
/// Nonces correlate requests and responses: a client acks or nacks a
/// response by echoing its nonce, and only the most recently sent nonce
/// is considered fresh. The format combines a nanosecond timestamp with
/// an atomic counter, both hex.
pub fn generate_nonce() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let count = NONCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{timestamp:x}-{count:x}")
}

/// Whether two resource-name lists contain the same elements, ignoring
/// order. An ack that changes the watched set this way warrants a new
/// response; an ack with an equal set is pure.
pub fn list_equal_unordered(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let set: HashSet<&str> = a.iter().map(String::as_str).collect();
    b.iter().all(|item| set.contains(item.as_str()))
}
