//! WebSocket adapter for the replay channel contract.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use tracing::debug;

use crate::stream::{ChannelError, ReplayChannel};

/// An axum WebSocket behind the [`ReplayChannel`] contract.
pub struct WsChannel {
    socket: WebSocket,
    closed: bool,
}

impl WsChannel {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl ReplayChannel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn send_binary(&mut self, payload: Bytes) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.socket
            .send(Message::Binary(payload))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.socket.recv().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Close(_)) => {
                    debug!("WebSocket close frame received");
                    return None;
                }
                // Pings are answered by the transport; binary input has no
                // meaning on this protocol.
                Ok(_) => continue,
                Err(err) => {
                    debug!(error = %err, "WebSocket receive error");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.socket.send(Message::Close(None)).await;
        }
    }
}
