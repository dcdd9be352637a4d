//! Error types for transfer sessions and the receiver server.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use tcpfile_wire::WireError;

use crate::session::SessionState;

/// Coarse classification of a failure, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The listening address could not be bound.
    ListenBindFailure,
    /// The destination file could not be opened (or its name was unsafe).
    FileOpenFailure,
    /// Writing received bytes to the destination failed.
    FileWriteFailure,
    /// The connection failed, closed early or went idle.
    SocketFailure,
    /// The peer sent bytes that do not follow the wire format.
    ProtocolViolation,
    /// The session was shut down locally.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ListenBindFailure => "listen bind failure",
            Self::FileOpenFailure => "file open failure",
            Self::FileWriteFailure => "file write failure",
            Self::SocketFailure => "socket failure",
            Self::ProtocolViolation => "protocol violation",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors produced by the receiver crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind {addr}: {source}")]
    ListenBind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("cannot open {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid file name: {0}")]
    InvalidPath(String),

    #[error("failed to write destination file: {0}")]
    FileWrite(#[source] io::Error),

    #[error("socket error: {0}")]
    Socket(#[source] io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[source] WireError),

    #[error("session is not receiving (state: {0:?})")]
    Inactive(SessionState),

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ListenBind { .. } => ErrorKind::ListenBindFailure,
            Self::FileOpen { .. } | Self::InvalidPath(_) => ErrorKind::FileOpenFailure,
            Self::FileWrite(_) => ErrorKind::FileWriteFailure,
            Self::Io(_) | Self::Socket(_) => ErrorKind::SocketFailure,
            Self::Protocol(_) | Self::Inactive(_) => ErrorKind::ProtocolViolation,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

// Transport failures surfacing through the codec belong to the socket.
impl From<WireError> for TransferError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Io(io) => Self::Socket(io),
            other => Self::Protocol(other),
        }
    }
}
