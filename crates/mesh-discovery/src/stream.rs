//! Transport abstraction for discovery streams.
//!
//! The session logic is generic over a send half and a receive half so
//! the same code serves tonic streams in production and in-memory
//! channels in tests. The receive half is owned by the receive task; the
//! send half is shared through the connection.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tonic::{Code, Status, Streaming};

use mesh_proto::{DiscoveryRequest, DiscoveryResponse};

/// The send half of a discovery stream.
#[async_trait]
pub trait StreamSender: Send + Sync {
    /// Send one response to the client.
    async fn send(&self, response: DiscoveryResponse) -> Result<(), Status>;
}

/// The receive half of a discovery stream. `Ok(None)` is a clean end of
/// stream.
#[async_trait]
pub trait StreamReceiver: Send {
    /// Receive the next request from the client.
    async fn recv(&mut self) -> Result<Option<DiscoveryRequest>, Status>;
}

/// Whether a stream error is expected during normal operation - this is
/// essentially "the client disconnected". Expected errors are logged at
/// info and do not fail the stream.
pub fn is_expected_stream_error(status: &Status) -> bool {
    match status.code() {
        Code::Cancelled | Code::DeadlineExceeded => true,
        Code::Unavailable => status.message() == "client disconnected",
        _ => false,
    }
}

/// Send half backed by the per-stream response channel tonic drains.
pub struct ChannelSender {
    tx: mpsc::Sender<Result<DiscoveryResponse, Status>>,
}

impl ChannelSender {
    /// Wrap a response channel.
    pub fn new(tx: mpsc::Sender<Result<DiscoveryResponse, Status>>) -> Self {
        Self { tx }
    }

    /// Fail the stream with a status.
    pub async fn fail(&self, status: Status) {
        let _ = self.tx.send(Err(status)).await;
    }
}

#[async_trait]
impl StreamSender for ChannelSender {
    async fn send(&self, response: DiscoveryResponse) -> Result<(), Status> {
        self.tx
            .send(Ok(response))
            .await
            .map_err(|_| Status::unavailable("client disconnected"))
    }
}

/// Receive half over a tonic request stream.
pub struct TonicReceiver {
    stream: Streaming<DiscoveryRequest>,
}

impl TonicReceiver {
    /// Wrap a tonic request stream.
    pub fn new(stream: Streaming<DiscoveryRequest>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl StreamReceiver for TonicReceiver {
    async fn recv(&mut self) -> Result<Option<DiscoveryRequest>, Status> {
        self.stream.message().await
    }
}

/// In-memory stream halves for tests and embedding.
pub mod channel {
    use super::*;

    /// Receive half over a plain channel.
    pub struct ChannelReceiver {
        rx: mpsc::Receiver<DiscoveryRequest>,
    }

    /// Create a linked (client-side sender, server-side receiver) pair.
    pub fn request_pair(buffer: usize) -> (mpsc::Sender<DiscoveryRequest>, ChannelReceiver) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, ChannelReceiver { rx })
    }

    #[async_trait]
    impl StreamReceiver for ChannelReceiver {
        async fn recv(&mut self) -> Result<Option<DiscoveryRequest>, Status> {
            Ok(self.rx.recv().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_errors() {
        assert!(is_expected_stream_error(&Status::cancelled("bye")));
        assert!(is_expected_stream_error(&Status::deadline_exceeded("slow")));
        assert!(is_expected_stream_error(&Status::unavailable(
            "client disconnected"
        )));
    }

    #[test]
    fn unexpected_errors() {
        assert!(!is_expected_stream_error(&Status::internal("boom")));
        assert!(!is_expected_stream_error(&Status::unavailable(
            "backend overloaded"
        )));
        assert!(!is_expected_stream_error(&Status::invalid_argument("bad")));
    }

    #[tokio::test]
    async fn channel_sender_reports_disconnect() {
        let (tx, rx) = mpsc::channel(1);
        let sender = ChannelSender::new(tx);
        drop(rx);

        let err = sender
            .send(DiscoveryResponse::default())
            .await
            .expect_err("closed channel must error");
        assert!(is_expected_stream_error(&err));
    }
}
