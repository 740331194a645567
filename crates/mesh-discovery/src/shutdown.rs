//! Graceful shutdown coordination.
//!
//! A single stop signal cascades: subscribers (the debouncer, the
//! dispatcher, the status tick, per-connection loops) observe the watch
//! channel and return; in-flight streams are tracked by operation guards
//! and drained within a bounded grace period, after which the remainder
//! is hard-killed by the transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Coordinates graceful shutdown across server tasks.
#[derive(Clone, Debug)]
pub struct ShutdownController {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    initiated: AtomicBool,
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    active_streams: AtomicUsize,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    /// Create a controller.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            inner: Arc::new(ShutdownInner {
                initiated: AtomicBool::new(false),
                tx,
                rx,
                active_streams: AtomicUsize::new(0),
            }),
        }
    }

    /// Subscribe to the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.rx.clone()
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.inner.initiated.load(Ordering::SeqCst)
    }

    /// Initiate shutdown and wait up to `drain` for in-flight streams.
    /// Returns whether everything drained in time.
    pub async fn shutdown(&self, drain: Duration) -> bool {
        if self
            .inner
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        info!(drain = ?drain, "initiating graceful shutdown");
        let _ = self.inner.tx.send(true);

        match timeout(drain, self.wait_for_streams()).await {
            Ok(()) => {
                info!("graceful shutdown complete");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.inner.active_streams.load(Ordering::SeqCst),
                    "drain deadline exceeded, terminating remaining streams"
                );
                false
            }
        }
    }

    async fn wait_for_streams(&self) {
        while self.inner.active_streams.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Track one in-flight stream; the guard releases it on drop.
    pub fn track_stream(&self) -> StreamGuard {
        self.inner.active_streams.fetch_add(1, Ordering::SeqCst);
        StreamGuard {
            controller: self.clone(),
        }
    }

    /// Number of in-flight streams.
    pub fn active_streams(&self) -> usize {
        self.inner.active_streams.load(Ordering::SeqCst)
    }
}

/// Guard tracking one in-flight stream.
#[derive(Debug)]
pub struct StreamGuard {
    controller: ShutdownController,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.controller
            .inner
            .active_streams
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve when the process receives SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_tracking() {
        let controller = ShutdownController::new();
        assert_eq!(controller.active_streams(), 0);

        {
            let _a = controller.track_stream();
            let _b = controller.track_stream();
            assert_eq!(controller.active_streams(), 2);
        }
        assert_eq!(controller.active_streams(), 0);
    }

    #[tokio::test]
    async fn subscribers_observe_signal() {
        let controller = ShutdownController::new();
        let mut rx = controller.subscribe();

        let trigger = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.shutdown(Duration::from_millis(50)).await;
        });

        rx.changed().await.expect("signal must arrive");
        assert!(controller.is_shutdown());
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let controller = ShutdownController::new();
        let guard = controller.track_stream();

        let drainer = controller.clone();
        let handle =
            tokio::spawn(async move { drainer.shutdown(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn drain_deadline_fires() {
        let controller = ShutdownController::new();
        let _stuck = controller.track_stream();
        assert!(!controller.shutdown(Duration::from_millis(30)).await);
    }
}
