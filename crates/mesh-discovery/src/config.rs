//! Server configuration and environment tunables.

use std::time::Duration;

use mesh_push::DebounceOptions;

/// Tunables for the discovery server. Every knob has a documented
/// default and an environment-variable override read by
/// [`DiscoveryConfig::from_env`].
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Hard deadline for a single response send
    /// (`MESHD_SEND_TIMEOUT_MS`, default 5000). Detects clients in a bad
    /// state that stopped reading.
    pub send_timeout: Duration,

    /// Debounce quiet period (`MESHD_DEBOUNCE_AFTER_MS`, default 100)
    /// and maximum delay (`MESHD_DEBOUNCE_MAX_MS`, default 10000).
    pub debounce: DebounceOptions,

    /// Distribution status reconcile tick
    /// (`MESHD_STATUS_UPDATE_INTERVAL_MS`, default 200).
    pub status_update_interval: Duration,

    /// Window after which a silent status reporter is evicted
    /// (`MESHD_STATUS_STALE_INTERVAL_MS`, default 60000).
    pub status_stale_interval: Duration,

    /// Maximum concurrent pushes in flight across connections
    /// (`MESHD_PUSH_THROTTLE`, default 100).
    pub push_throttle: usize,

    /// Maximum concurrent streams per HTTP/2 connection
    /// (`MESHD_MAX_CONCURRENT_STREAMS`, default 100).
    pub max_concurrent_streams: u32,

    /// Maximum receive message size in bytes
    /// (`MESHD_MAX_RECV_MSG_SIZE`, default 4 MiB).
    pub max_recv_message_size: usize,

    /// Whether stream identities must match the proxy's claimed
    /// namespace and service account (`MESHD_ENABLE_IDENTITY_CHECK`,
    /// default false).
    pub enable_identity_check: bool,

    /// Connection age limit handed to the gRPC server during graceful
    /// shutdown so long-lived streams cycle
    /// (`MESHD_MAX_CONNECTION_AGE_MS`, unset by default).
    pub max_connection_age: Option<Duration>,

    /// How long to wait for in-flight streams to drain on shutdown
    /// (`MESHD_DRAIN_DURATION_MS`, default 10000).
    pub drain_duration: Duration,

    /// Per-stream response channel depth.
    pub stream_buffer_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            debounce: DebounceOptions::default(),
            status_update_interval: Duration::from_millis(200),
            status_stale_interval: Duration::from_secs(60),
            push_throttle: 100,
            max_concurrent_streams: 100,
            max_recv_message_size: 4 * 1024 * 1024,
            enable_identity_check: false,
            max_connection_age: None,
            drain_duration: Duration::from_secs(10),
            stream_buffer_size: 16,
        }
    }
}

impl DiscoveryConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset or unparseable variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = read_u64("MESHD_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64("MESHD_DEBOUNCE_AFTER_MS") {
            config.debounce.debounce_after = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64("MESHD_DEBOUNCE_MAX_MS") {
            config.debounce.debounce_max = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64("MESHD_STATUS_UPDATE_INTERVAL_MS") {
            config.status_update_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64("MESHD_STATUS_STALE_INTERVAL_MS") {
            config.status_stale_interval = Duration::from_millis(ms);
        }
        if let Some(n) = read_u64("MESHD_PUSH_THROTTLE") {
            config.push_throttle = n as usize;
        }
        if let Some(n) = read_u64("MESHD_MAX_CONCURRENT_STREAMS") {
            config.max_concurrent_streams = n as u32;
        }
        if let Some(n) = read_u64("MESHD_MAX_RECV_MSG_SIZE") {
            config.max_recv_message_size = n as usize;
        }
        if let Ok(v) = std::env::var("MESHD_ENABLE_IDENTITY_CHECK") {
            config.enable_identity_check = v == "true" || v == "1";
        }
        if let Some(ms) = read_u64("MESHD_MAX_CONNECTION_AGE_MS") {
            config.max_connection_age = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = read_u64("MESHD_DRAIN_DURATION_MS") {
            config.drain_duration = Duration::from_millis(ms);
        }
        config
    }
}

fn read_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documentation() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.status_update_interval, Duration::from_millis(200));
        assert_eq!(config.status_stale_interval, Duration::from_secs(60));
        assert_eq!(config.debounce.debounce_after, Duration::from_millis(100));
        assert_eq!(config.push_throttle, 100);
        assert!(!config.enable_identity_check);
    }
}
