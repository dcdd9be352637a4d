//! Notifications delivered to whoever presents the receiver's state.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::ErrorKind;

/// What a finished transfer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    /// Name announced by the sender.
    pub file_name: String,
    /// Where the file was written.
    pub path: PathBuf,
    /// Body bytes written.
    pub bytes: u64,
    /// Hex SHA-256 of the body.
    pub sha256: String,
}

/// Events emitted by the server and its sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The server is ready to accept the next connection.
    Listening { addr: SocketAddr },
    /// A connection was accepted and a session started.
    Accepted { peer: SocketAddr },
    /// Human-readable status line.
    Status(String),
    Progress { bytes_received: u64, total_bytes: u64 },
    Completed(TransferSummary),
    Failed { kind: ErrorKind, message: String },
}

/// Sending half of the event channel.
///
/// A sink without a channel discards everything. Progress updates are
/// dropped when the channel is full; every other event waits for room.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TransferEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TransferEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Creates a sink together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn progress(&self, bytes_received: u64, total_bytes: u64) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(TransferEvent::Progress {
                bytes_received,
                total_bytes,
            });
        }
    }

    pub async fn status(&self, text: impl Into<String>) {
        self.send(TransferEvent::Status(text.into())).await;
    }

    pub async fn send(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver only means nobody is watching.
            let _ = tx.send(event).await;
        }
    }
}
