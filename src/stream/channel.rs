//! Duplex channel contract between the control plane and the transport.
//!
//! The plane never sees a socket. The production implementation adapts an
//! axum WebSocket; [`pair`] builds an in-memory equivalent for tests and
//! embedding. Bounded send capacity is the backpressure mechanism: a send
//! completes only when the peer side has room, so a slow consumer slows the
//! playback loop instead of growing a queue.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Channel send failures. The peer being gone is the only case; the plane
/// responds by cleaning up, never by propagating.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel closed by peer")]
    Closed,
}

/// A frame leaving the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Bytes),
}

/// Server side of one replay attachment.
#[async_trait]
pub trait ReplayChannel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    async fn send_binary(&mut self, payload: Bytes) -> Result<(), ChannelError>;

    /// Next inbound text message; `None` once the peer has closed.
    async fn recv_text(&mut self) -> Option<String>;

    /// Release the transport. Idempotent.
    async fn close(&mut self);
}

/// In-memory server channel, paired with a [`RemoteClient`].
pub struct MemoryChannel {
    out_tx: Option<mpsc::Sender<OutboundFrame>>,
    in_rx: mpsc::Receiver<String>,
}

/// The client half of an in-memory pair: what the test harness drives.
pub struct RemoteClient {
    out_rx: mpsc::Receiver<OutboundFrame>,
    in_tx: Option<mpsc::Sender<String>>,
}

/// Build a connected in-memory channel pair.
///
/// The outbound direction has capacity 1, matching the one-frame-in-flight
/// bound of the playback loop.
pub fn pair() -> (MemoryChannel, RemoteClient) {
    let (out_tx, out_rx) = mpsc::channel(1);
    let (in_tx, in_rx) = mpsc::channel(16);

    (
        MemoryChannel {
            out_tx: Some(out_tx),
            in_rx,
        },
        RemoteClient {
            out_rx,
            in_tx: Some(in_tx),
        },
    )
}

#[async_trait]
impl ReplayChannel for MemoryChannel {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        match &self.out_tx {
            Some(tx) => tx
                .send(OutboundFrame::Text(text))
                .await
                .map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    async fn send_binary(&mut self, payload: Bytes) -> Result<(), ChannelError> {
        match &self.out_tx {
            Some(tx) => tx
                .send(OutboundFrame::Binary(payload))
                .await
                .map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    async fn recv_text(&mut self) -> Option<String> {
        self.in_rx.recv().await
    }

    async fn close(&mut self) {
        self.out_tx = None;
    }
}

impl RemoteClient {
    /// Send a raw text command to the server side.
    pub async fn send(&self, text: impl Into<String>) {
        if let Some(tx) = &self.in_tx {
            let _ = tx.send(text.into()).await;
        }
    }

    /// Next outbound frame from the server; `None` once the server closed.
    pub async fn next(&mut self) -> Option<OutboundFrame> {
        self.out_rx.recv().await
    }

    /// Hang up from the client side.
    pub fn disconnect(&mut self) {
        self.in_tx = None;
        self.out_rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut server, mut client) = pair();

        client.send(r#"{"action":"pause"}"#).await;
        assert_eq!(
            server.recv_text().await.as_deref(),
            Some(r#"{"action":"pause"}"#)
        );

        server.send_text("hello".to_string()).await.unwrap();
        assert_eq!(
            client.next().await,
            Some(OutboundFrame::Text("hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (mut server, _client) = pair();
        server.close().await;
        assert!(server.send_text("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_surfaces_as_closed() {
        let (mut server, mut client) = pair();
        client.disconnect();

        assert!(server.recv_text().await.is_none());
        assert!(server.send_binary(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_server_close_ends_client_stream() {
        let (mut server, mut client) = pair();
        server.send_text("only".to_string()).await.unwrap();
        server.close().await;

        assert_eq!(
            client.next().await,
            Some(OutboundFrame::Text("only".to_string()))
        );
        assert_eq!(client.next().await, None);
    }
}
