//! One accepted connection, from the first header byte to the closed file.
//!
//! A [`TransferSession`] owns the connection and the destination file.
//! Data events feed its [`FrameDecoder`]; header and body events become
//! file operations and progress notifications. Every terminal path closes
//! both handles before the session reports its outcome.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tcpfile_wire::{DecoderEvent, FrameDecoder, TransferHeader};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DEFAULT_READ_BUFFER_SIZE;
use crate::error::TransferError;
use crate::events::{EventSink, TransferEvent, TransferSummary};
use crate::validation::resolve_destination;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no connection yet.
    Idle,
    /// Connection accepted, no data seen.
    Accepting,
    /// At least one chunk has arrived.
    Receiving,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory received names are resolved under.
    pub destination_dir: PathBuf,
    /// Size of each socket read.
    pub read_buffer_size: usize,
    /// Fail the session when the peer sends nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from("."),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            idle_timeout: None,
        }
    }
}

struct Destination {
    file: File,
    path: PathBuf,
}

/// Receiver side of a single transfer.
pub struct TransferSession<C> {
    config: SessionConfig,
    events: EventSink,
    cancel: CancellationToken,
    state: SessionState,
    decoder: FrameDecoder,
    header: Option<TransferHeader>,
    bytes_received: u64,
    hasher: Sha256,
    destination: Option<Destination>,
    destination_path: Option<PathBuf>,
    connection: Option<C>,
}

impl<C> TransferSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(config: SessionConfig, events: EventSink, cancel: CancellationToken) -> Self {
        Self {
            config,
            events,
            cancel,
            state: SessionState::Idle,
            decoder: FrameDecoder::new(),
            header: None,
            bytes_received: 0,
            hasher: Sha256::new(),
            destination: None,
            destination_path: None,
            connection: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Body bytes written to the destination so far.
    ///
    /// Each chunk is flushed to the OS before it is counted.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// The decoded header, once the name has arrived.
    pub fn header(&self) -> Option<&TransferHeader> {
        self.header.as_ref()
    }

    /// Where the received bytes go, once the header has been decoded.
    pub fn destination_path(&self) -> Option<&Path> {
        self.destination_path.as_deref()
    }

    /// Whether the destination file is still open.
    pub fn has_open_file(&self) -> bool {
        self.destination.is_some()
    }

    /// Whether the connection is still held.
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Starts the session on a freshly accepted connection.
    pub async fn on_accepted(&mut self, connection: C) -> Result<(), TransferError> {
        if self.state != SessionState::Idle {
            return Err(TransferError::Inactive(self.state));
        }

        self.decoder.reset();
        self.header = None;
        self.destination_path = None;
        self.bytes_received = 0;
        self.hasher = Sha256::new();
        self.connection = Some(connection);
        self.state = SessionState::Accepting;

        self.events.status("connection accepted").await;
        Ok(())
    }

    /// Handles one chunk delivered by the transport.
    ///
    /// On failure the session has already been torn down and reported.
    pub async fn on_data_available(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        match self.state {
            SessionState::Accepting => self.state = SessionState::Receiving,
            SessionState::Receiving => {}
            state => return Err(TransferError::Inactive(state)),
        }

        match self.consume(chunk).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Aborts the session because the transport failed.
    ///
    /// Whatever reached the destination stays on disk. Errors arriving after
    /// the session finished are ignored.
    pub async fn on_socket_error(&mut self, error: io::Error) -> Result<(), TransferError> {
        if self.state.is_terminal() {
            debug!("socket error after session end ignored: {error}");
            return Ok(());
        }
        Err(self.abort(TransferError::Socket(error)).await)
    }

    /// Cancels the session, releasing the file and the connection.
    pub async fn shutdown(&mut self) {
        if !self.state.is_terminal() {
            self.abort(TransferError::Cancelled).await;
        }
    }

    /// Reads from the owned connection until the transfer finishes.
    ///
    /// Premature EOF, read errors and the idle timeout fail the session as
    /// socket errors; cancellation fails it as [`TransferError::Cancelled`].
    pub async fn run(&mut self) -> Result<TransferSummary, TransferError> {
        if self.state == SessionState::Idle {
            return Err(TransferError::Inactive(self.state));
        }

        let idle_timeout = self.config.idle_timeout;
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        while !self.state.is_terminal() {
            let Some(conn) = self.connection.as_mut() else {
                break;
            };

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = read_chunk(conn, &mut buf, idle_timeout) => Some(result),
            };

            match read {
                None => return Err(self.abort(TransferError::Cancelled).await),
                Some(Ok(0)) => {
                    let eof = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the connection before the transfer completed",
                    );
                    return Err(self.abort(TransferError::Socket(eof)).await);
                }
                Some(Ok(n)) => self.on_data_available(&buf[..n]).await?,
                Some(Err(e)) => return Err(self.abort(TransferError::Socket(e)).await),
            }
        }

        match (self.state, self.summary()) {
            (SessionState::Completed, Some(summary)) => Ok(summary),
            (state, _) => Err(TransferError::Inactive(state)),
        }
    }

    async fn consume(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        // Events before a decoder error still apply: body bytes that fit the
        // announced size are written before trailing garbage is reported.
        let events: Vec<_> = self.decoder.feed(chunk).collect();

        for event in events {
            match event? {
                DecoderEvent::NeedMoreData => {}
                DecoderEvent::HeaderReady {
                    total_bytes,
                    file_name,
                } => self.open_destination(total_bytes, file_name).await?,
                DecoderEvent::BodyChunk(bytes) => self.write_body(&bytes).await?,
                DecoderEvent::Done => self.complete().await?,
            }
        }
        Ok(())
    }

    async fn open_destination(
        &mut self,
        total_bytes: u64,
        file_name: String,
    ) -> Result<(), TransferError> {
        let path = resolve_destination(&self.config.destination_dir, &file_name)?;
        let file = open_for_write(&path).await?;

        info!(file = %file_name, total_bytes, path = %path.display(), "receiving file");
        self.destination_path = Some(path.clone());
        self.destination = Some(Destination { file, path });
        self.events
            .status(format!("receiving {file_name} ({total_bytes} bytes)"))
            .await;
        self.header = Some(TransferHeader::new(total_bytes, file_name));
        self.events.progress(self.bytes_received, total_bytes);
        Ok(())
    }

    async fn write_body(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        let state = self.state;
        let dest = self
            .destination
            .as_mut()
            .ok_or(TransferError::Inactive(state))?;
        dest.file
            .write_all(bytes)
            .await
            .map_err(TransferError::FileWrite)?;
        // tokio's File finishes writes in the background; wait for this one
        // so the counter only covers bytes the OS accepted.
        dest.file.flush().await.map_err(TransferError::FileWrite)?;

        self.hasher.update(bytes);
        self.bytes_received += bytes.len() as u64;

        let total_bytes = self.total_bytes();
        debug_assert!(self.bytes_received <= total_bytes);
        debug!(
            bytes_received = self.bytes_received,
            total_bytes, "body chunk written"
        );
        self.events.progress(self.bytes_received, total_bytes);
        Ok(())
    }

    async fn complete(&mut self) -> Result<(), TransferError> {
        if let Some(dest) = self.destination.as_mut() {
            dest.file.flush().await.map_err(TransferError::FileWrite)?;
        }
        self.release().await;
        self.state = SessionState::Completed;

        let summary = self.summary().ok_or(TransferError::Inactive(self.state))?;
        info!(
            file = %summary.file_name,
            bytes = summary.bytes,
            sha256 = %summary.sha256,
            "transfer complete"
        );
        self.events.send(TransferEvent::Completed(summary)).await;
        Ok(())
    }

    /// Tears the session down after `error` and reports it.
    async fn abort(&mut self, error: TransferError) -> TransferError {
        self.release().await;
        self.state = SessionState::Failed;

        warn!(
            kind = %error.kind(),
            bytes_received = self.bytes_received,
            "transfer failed: {error}"
        );
        self.events
            .send(TransferEvent::Failed {
                kind: error.kind(),
                message: error.to_string(),
            })
            .await;
        error
    }

    /// Closes the destination file and the connection, whichever are open.
    async fn release(&mut self) {
        if let Some(mut dest) = self.destination.take() {
            // Pending writes must land before the handle goes away.
            if let Err(e) = dest.file.flush().await {
                warn!(path = %dest.path.display(), "flush on close failed: {e}");
            }
        }
        if let Some(mut conn) = self.connection.take() {
            if let Err(e) = conn.shutdown().await {
                debug!("connection shutdown failed: {e}");
            }
        }
    }

    fn total_bytes(&self) -> u64 {
        self.header.as_ref().map_or(0, |h| h.total_bytes)
    }

    fn summary(&self) -> Option<TransferSummary> {
        let header = self.header.as_ref()?;
        Some(TransferSummary {
            file_name: header.file_name.clone(),
            path: self.destination_path.clone()?,
            bytes: self.bytes_received,
            sha256: hex::encode(self.hasher.clone().finalize()),
        })
    }
}

async fn open_for_write(path: &Path) -> Result<File, TransferError> {
    let open_err = |source| TransferError::FileOpen {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(open_err)?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(open_err)
}

async fn read_chunk<R: AsyncRead + Unpin>(
    conn: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> io::Result<usize> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, conn.read(buf))
            .await
            .unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no data from peer for {limit:?}"),
                ))
            }),
        None => conn.read(buf).await,
    }
}
