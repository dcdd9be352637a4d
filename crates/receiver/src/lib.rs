//! TCP receiver for single-file transfers.
//!
//! [`ReceiverServer`] listens and accepts one connection at a time; each
//! connection gets a [`TransferSession`] that decodes the stream with
//! [`tcpfile_wire::FrameDecoder`] and writes the body to disk. State changes
//! are published as [`TransferEvent`]s for whatever presents them.

pub mod error;
pub mod events;
pub mod sender;
pub mod server;
pub mod session;
pub mod validation;

pub use error::{ErrorKind, TransferError};
pub use events::{EventSink, TransferEvent, TransferSummary};
pub use sender::{send_file, send_stream};
pub use server::{ReceiverServer, ServerConfig, is_session_local};
pub use session::{SessionConfig, SessionState, TransferSession};
pub use validation::resolve_destination;

use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 16998;

/// Socket read and file copy buffer size (64 KB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Timeout for the sender's connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
