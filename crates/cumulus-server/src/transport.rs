//! WebSocket transport.
//!
//! Each accepted socket is split into a reader, driven by the connection
//! handler, and a writer task fed through an unbounded channel. Everything
//! that wants to talk to the client (the liveness scheduler, broadcasts,
//! direct replies) holds a [`WsProxy`] clone and queues [`Outbound`] items;
//! none of them touch the socket or block.

use cumulus_core::{ConnectionProxy, EvictionReason};
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// Item queued for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame
    Text(String),
    /// Liveness probe, sent as a WebSocket Ping
    Probe,
    /// Close frame with a reason; the writer stops after sending it
    Close(String),
}

/// Handle for queueing frames to one client.
#[derive(Debug, Clone)]
pub struct WsProxy {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl WsProxy {
    /// Create a proxy and the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a text frame. Returns `false` if the writer has stopped.
    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Queue a close frame.
    pub fn close(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Outbound::Close(reason.into()));
    }
}

impl ConnectionProxy for WsProxy {
    fn send_probe(&self) {
        let _ = self.tx.send(Outbound::Probe);
    }

    fn force_close(&self, reason: EvictionReason) {
        self.close(reason.as_str());
    }
}

/// Drain `rx` into the socket until a close is sent, every proxy is dropped,
/// or the socket fails.
pub async fn run_writer<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(item) = rx.recv().await {
        let (message, last) = match item {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Probe => (Message::Ping(Vec::new().into()), false),
            Outbound::Close(reason) => {
                let frame = CloseFrame { code: CloseCode::Policy, reason: reason.into() };
                (Message::Close(Some(frame)), true)
            },
        };

        if sink.send(message).await.is_err() || last {
            break;
        }
    }

    let _ = sink.close().await;
}
