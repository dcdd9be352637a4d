//! Listening side of the receiver.
//!
//! Binds the configured address and serves one connection at a time. The
//! listener stays bound while a transfer runs; connections arriving in the
//! meantime wait in the accept backlog and are served in order once the
//! current session reaches a terminal state.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::DEFAULT_PORT;
use crate::error::{ErrorKind, TransferError};
use crate::events::{EventSink, TransferEvent, TransferSummary};
use crate::session::{SessionConfig, TransferSession};

/// First pause after a failed accept.
const ACCEPT_RETRY_BASE: Duration = Duration::from_millis(100);

/// Longest pause between accept attempts.
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
    /// Extra bind attempts after the first failure.
    pub bind_retries: u32,
    /// Pause between bind attempts.
    pub bind_retry_delay: Duration,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            bind_retries: 3,
            bind_retry_delay: Duration::from_secs(1),
            session: SessionConfig::default(),
        }
    }
}

/// Accepts connections and runs a fresh [`TransferSession`] for each.
pub struct ReceiverServer {
    config: ServerConfig,
    events: EventSink,
    cancel: CancellationToken,
}

impl ReceiverServer {
    pub fn new(config: ServerConfig, events: EventSink, cancel: CancellationToken) -> Self {
        Self {
            config,
            events,
            cancel,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stops the accept loop and cancels the active session, if any.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the listening socket, retrying as configured.
    pub async fn bind(&self) -> Result<TcpListener, TransferError> {
        let addr = self.config.bind_addr;
        let mut attempt = 0;

        loop {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!(%addr, "receiver listener bound");
                    return Ok(listener);
                }
                Err(source) if attempt < self.config.bind_retries => {
                    attempt += 1;
                    warn!(%addr, attempt, "bind failed, retrying: {source}");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                        _ = tokio::time::sleep(self.config.bind_retry_delay) => {}
                    }
                }
                Err(source) => {
                    let err = TransferError::ListenBind { addr, source };
                    self.report(&err).await;
                    return Err(err);
                }
            }
        }
    }

    /// Serves connections until shutdown.
    ///
    /// Session failures are reported and never end the loop; after every
    /// terminal outcome the server announces [`TransferEvent::Listening`]
    /// again. Accept errors back off before the next attempt and only the
    /// first of a run is reported.
    pub async fn run(&self, listener: TcpListener) -> Result<(), TransferError> {
        let addr = listener.local_addr()?;
        let mut accept_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                info!("receiver shutting down");
                return Ok(());
            }
            if accept_failures == 0 {
                info!(%addr, "ready for the next transfer");
                self.events.send(TransferEvent::Listening { addr }).await;
            }

            let (stream, peer) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("receiver shutting down");
                    return Ok(());
                }
                result = listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        self.accept_backoff(e, accept_failures).await;
                        continue;
                    }
                }
            };
            accept_failures = 0;

            info!(%peer, "connection accepted");
            self.events.send(TransferEvent::Accepted { peer }).await;

            if let Err(e) = stream.set_nodelay(true) {
                warn!(%peer, "set_nodelay failed: {e}");
            }

            match self.serve(stream).await {
                Ok(summary) => info!(%peer, file = %summary.file_name, "transfer served"),
                Err(e) => warn!(%peer, kind = %e.kind(), "transfer ended with error: {e}"),
            }
        }
    }

    /// Reports the first failure of a run and waits before the next accept.
    async fn accept_backoff(&self, error: io::Error, failures: u32) {
        let delay = accept_retry_delay(failures);
        if failures == 1 {
            error!("accept error: {error}");
            self.report(&TransferError::Socket(error)).await;
        } else {
            debug!(failures, ?delay, "accept still failing: {error}");
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Runs one session over an already accepted connection.
    pub async fn serve<C>(&self, connection: C) -> Result<TransferSummary, TransferError>
    where
        C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let mut session = TransferSession::new(
            self.config.session.clone(),
            self.events.clone(),
            self.cancel.child_token(),
        );
        session.on_accepted(connection).await?;
        session.run().await
    }

    async fn report(&self, err: &TransferError) {
        self.events
            .send(TransferEvent::Failed {
                kind: err.kind(),
                message: err.to_string(),
            })
            .await;
    }
}

/// Pause after the `failures`-th consecutive accept error, doubling from
/// [`ACCEPT_RETRY_BASE`] up to [`ACCEPT_RETRY_MAX`].
fn accept_retry_delay(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    ACCEPT_RETRY_BASE
        .saturating_mul(1u32 << shift)
        .min(ACCEPT_RETRY_MAX)
}

/// Whether `kind` ended a session rather than the whole server.
pub fn is_session_local(kind: ErrorKind) -> bool {
    !matches!(kind, ErrorKind::ListenBindFailure)
}
