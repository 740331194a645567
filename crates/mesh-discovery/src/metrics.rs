//! Metrics for the discovery server.
//!
//! Counters and histograms go through the `metrics` facade; the gauge
//! for connected proxies is additionally tracked on an atomic so the
//! debug surface can read it without a registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};

use mesh_core::TypeUrl;

/// Metrics recorder shared across the server.
#[derive(Clone, Debug)]
pub struct DiscoveryMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    connected_proxies: AtomicU64,
}

impl Default for DiscoveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryMetrics {
    /// Create a recorder.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                connected_proxies: AtomicU64::new(0),
            }),
        }
    }

    /// An inbound discovery request.
    pub fn record_request(&self, type_url: &str) {
        counter!("xds_requests_total", "type" => TypeUrl::metric_name(type_url).to_string())
            .increment(1);
    }

    /// A response pushed for one type, with its render+send latency.
    pub fn record_push(&self, type_url: &str, elapsed: Duration) {
        counter!("xds_pushes_total", "type" => TypeUrl::metric_name(type_url).to_string())
            .increment(1);
        histogram!("xds_push_time_seconds", "type" => TypeUrl::metric_name(type_url).to_string())
            .record(elapsed.as_secs_f64());
    }

    /// A client rejected a response.
    pub fn record_nack(&self, type_url: &str, error_code: &str) {
        counter!(
            "xds_rejects_total",
            "type" => TypeUrl::metric_name(type_url).to_string(),
            "code" => error_code.to_string()
        )
        .increment(1);
    }

    /// An ack arrived for a nonce that is no longer the latest.
    pub fn record_stale_nonce(&self) {
        counter!("xds_expired_nonce_total").increment(1);
    }

    /// An unexpected internal error.
    pub fn record_internal_error(&self) {
        counter!("xds_internal_errors_total").increment(1);
    }

    /// A response write missed the send deadline.
    pub fn record_send_timeout(&self, type_url: &str) {
        counter!("xds_write_timeouts_total", "type" => TypeUrl::metric_name(type_url).to_string())
            .increment(1);
    }

    /// A generator failed; the push for that type was skipped.
    pub fn record_generator_error(&self, type_url: &str) {
        counter!("xds_generator_errors_total", "type" => TypeUrl::metric_name(type_url).to_string())
            .increment(1);
    }

    /// Time from push request creation to the proxy being up to date.
    pub fn record_convergence(&self, elapsed: Duration) {
        histogram!("xds_proxy_convergence_seconds").record(elapsed.as_secs_f64());
    }

    /// Number of services at the time of a full push.
    pub fn record_pushed_services(&self, count: usize) {
        gauge!("xds_pushed_services").set(count as f64);
    }

    /// A proxy connected.
    pub fn proxy_connected(&self) {
        let count = self.inner.connected_proxies.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("xds_connected_proxies").set(count as f64);
    }

    /// A proxy disconnected.
    pub fn proxy_disconnected(&self) {
        let count = self.inner.connected_proxies.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!("xds_connected_proxies").set(count as f64);
    }

    /// Current connected-proxy count.
    pub fn connected_proxies(&self) -> u64 {
        self.inner.connected_proxies.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_gauge_tracks_connections() {
        let metrics = DiscoveryMetrics::new();
        assert_eq!(metrics.connected_proxies(), 0);

        metrics.proxy_connected();
        metrics.proxy_connected();
        assert_eq!(metrics.connected_proxies(), 2);

        metrics.proxy_disconnected();
        assert_eq!(metrics.connected_proxies(), 1);
    }

    #[test]
    fn recorders_do_not_panic_without_registry() {
        let metrics = DiscoveryMetrics::new();
        metrics.record_request(TypeUrl::CLUSTER);
        metrics.record_push(TypeUrl::ROUTE, Duration::from_millis(3));
        metrics.record_nack(TypeUrl::LISTENER, "INVALID_ARGUMENT");
        metrics.record_stale_nonce();
        metrics.record_send_timeout(TypeUrl::SECRET);
        metrics.record_generator_error(TypeUrl::ENDPOINT);
        metrics.record_convergence(Duration::from_millis(250));
    }
}
