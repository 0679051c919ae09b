//! Outbound transport owned by a session

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::mcp::message::JsonRpcMessage;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError>;

    /// Stops outbound delivery. The receiving side observes end of stream.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Transport backed by an unbounded channel whose receiver feeds an SSE stream.
#[derive(Debug)]
pub struct ChannelTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<JsonRpcMessage>>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TransportError::Closed)?;
        sender.send(message).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.sender.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .map_or(true, mpsc::UnboundedSender::is_closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_ends_the_receiving_stream() {
        let (transport, mut receiver) = ChannelTransport::new();
        transport
            .send(JsonRpcMessage::notification("ping", None))
            .await
            .expect("open transport sends");

        transport.close();
        assert!(transport.is_closed());
        assert_eq!(
            transport.send(JsonRpcMessage::notification("ping", None)).await,
            Err(TransportError::Closed)
        );

        assert!(receiver.recv().await.is_some());
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (transport, receiver) = ChannelTransport::new();
        drop(receiver);
        assert!(transport.is_closed());
        assert_eq!(
            transport.send(JsonRpcMessage::notification("ping", None)).await,
            Err(TransportError::Closed)
        );
    }
}
