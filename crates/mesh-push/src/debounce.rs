//! Debouncing of config-change events.
//!
//! Change events arrive in bursts (a deployment rollout touches many
//! objects in quick succession). The debouncer merges incoming
//! [`PushRequest`]s and releases the merged request when either the quiet
//! period has elapsed since the most recent event, or the maximum delay
//! has elapsed since the first pending event. The released request flows
//! to the snapshot build and then to fan-out.
//!
//! The output channel is bounded: if the downstream push pipeline is
//! still working, the debouncer keeps merging instead of piling up
//! requests.

use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::request::PushRequest;

/// Debounce tuning.
#[derive(Clone, Copy, Debug)]
pub struct DebounceOptions {
    /// Quiet period that must elapse after the last event.
    pub debounce_after: Duration,
    /// Maximum total delay from the first pending event.
    pub debounce_max: Duration,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        Self {
            debounce_after: Duration::from_millis(100),
            debounce_max: Duration::from_secs(10),
        }
    }
}

/// Run the debounce loop until the input channel closes.
///
/// Merged requests are sent on `out`; the send awaits downstream
/// capacity, which is the intended backpressure. On shutdown (input
/// closed) a pending merged request is flushed before returning.
pub async fn run_debounce(
    mut rx: mpsc::UnboundedReceiver<PushRequest>,
    opts: DebounceOptions,
    out: mpsc::Sender<PushRequest>,
) {
    let mut merged: Option<PushRequest> = None;
    let mut first_event = Instant::now();
    let mut last_event = Instant::now();
    let mut events_since_push: u64 = 0;

    loop {
        let deadline = match &merged {
            Some(_) => {
                let quiet = last_event + opts.debounce_after;
                let cap = first_event + opts.debounce_max;
                Some(quiet.min(cap))
            }
            None => None,
        };

        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(req) => {
                        counter!("push_debounce_events_total").increment(1);
                        events_since_push += 1;
                        let now = Instant::now();
                        if merged.is_none() {
                            first_event = now;
                        }
                        last_event = now;
                        merged = Some(match merged.take() {
                            Some(pending) => pending.merge(req),
                            None => req,
                        });
                    }
                    None => {
                        // Input closed: flush and stop.
                        if let Some(req) = merged.take() {
                            let _ = out.send(req).await;
                        }
                        info!("debouncer stopped");
                        return;
                    }
                }
            }
            // The branch is disabled while nothing is pending.
            _ = async { tokio::time::sleep_until(deadline.expect("deadline set")).await }, if deadline.is_some() => {
                let req = merged.take().expect("pending request present at deadline");
                debug!(
                    events = events_since_push,
                    full = req.full,
                    configs = req.configs_updated.len(),
                    "debounce window closed, pushing"
                );
                counter!("push_debounce_flushes_total").increment(1);
                events_since_push = 0;
                if out.send(req).await.is_err() {
                    info!("push pipeline closed, stopping debouncer");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::TriggerReason;
    use mesh_core::{ConfigKey, ConfigKind};
    use tokio::time::timeout;

    fn key(name: &str) -> ConfigKey {
        ConfigKey::new(ConfigKind::VirtualService, name, "ns")
    }

    fn options() -> DebounceOptions {
        DebounceOptions {
            debounce_after: Duration::from_millis(20),
            debounce_max: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn coalesces_burst_into_one_push() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_debounce(rx, options(), out_tx));

        tx.send(PushRequest::for_config(key("a"), TriggerReason::Config))
            .unwrap();
        tx.send(PushRequest::for_config(key("b"), TriggerReason::Config))
            .unwrap();
        tx.send(PushRequest::for_config(key("c"), TriggerReason::Service))
            .unwrap();

        let merged = timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("debounce must flush")
            .expect("channel open");
        assert_eq!(merged.configs_updated.len(), 3);
        assert_eq!(merged.reasons.len(), 3);

        // Nothing else pending.
        drop(tx);
        assert!(out_rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn max_delay_bounds_continuous_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let opts = DebounceOptions {
            debounce_after: Duration::from_millis(40),
            debounce_max: Duration::from_millis(120),
        };
        let handle = tokio::spawn(run_debounce(rx, opts, out_tx));

        // Keep sending inside the quiet window; the max delay must still
        // force a flush.
        let feeder = tokio::spawn(async move {
            for i in 0..20 {
                let _ = tx.send(PushRequest::for_config(
                    key(&format!("k{i}")),
                    TriggerReason::Endpoint,
                ));
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
        });

        let merged = timeout(Duration::from_millis(500), out_rx.recv())
            .await
            .expect("max delay must flush")
            .expect("channel open");
        assert!(!merged.configs_updated.is_empty());

        feeder.await.unwrap();
        drop(out_rx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn flushes_pending_request_on_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let opts = DebounceOptions {
            debounce_after: Duration::from_secs(30),
            debounce_max: Duration::from_secs(60),
        };
        let handle = tokio::spawn(run_debounce(rx, opts, out_tx));

        tx.send(PushRequest::full(TriggerReason::Global)).unwrap();
        drop(tx);

        let flushed = timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("flush on shutdown")
            .expect("channel open");
        assert!(flushed.full);
        handle.await.unwrap();
    }
}
