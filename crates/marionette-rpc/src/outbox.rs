//! Per-connection outbound frame queue.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{BinaryFrame, OutboundMessage};

/// A frame waiting for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Serialized [`OutboundMessage`].
    Text(String),
    /// Encoded [`BinaryFrame`].
    Binary(Bytes),
}

/// Sending half of a connection's frame queue.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
}

/// Create a bounded frame queue.
pub fn channel(capacity: usize) -> (Outbox, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbox { tx }, rx)
}

impl Outbox {
    /// Queue a text envelope. Waits while the queue is full.
    ///
    /// Returns `false` once the writer has gone away.
    pub async fn send(&self, message: OutboundMessage) -> bool {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = ?message.kind, error = %e, "failed to serialize envelope");
                return false;
            }
        };
        self.push(Frame::Text(json)).await
    }

    /// Queue a binary frame.
    pub async fn send_binary(&self, frame: &BinaryFrame) -> bool {
        self.push(Frame::Binary(frame.encode())).await
    }

    /// Whether the writer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn push(&self, frame: Frame) -> bool {
        if self.tx.send(frame).await.is_ok() {
            true
        } else {
            warn!("outbound queue closed, dropping frame");
            false
        }
    }
}
