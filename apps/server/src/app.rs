//! Application orchestrator: wires the receiver server to the log presenter.

use tcpfile_receiver::{EventSink, ReceiverServer, TransferEvent, is_session_local};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Runs the receiver until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- Presentation --
    let (events, rx) = EventSink::channel(config.event_channel_capacity);
    let presenter = tokio::spawn(present(rx));

    // -- Server --
    let server = ReceiverServer::new(config.server_config()?, events, cancel.clone());
    let listener = server.bind().await?;

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, shutting down");
            shutdown.cancel();
        }
    });

    server.run(listener).await?;

    // Dropping the server closes the event channel and ends the presenter.
    drop(server);
    presenter.await?;
    Ok(())
}

/// Logs every event until the channel closes.
async fn present(mut rx: mpsc::Receiver<TransferEvent>) {
    let mut presenter = Presenter::default();
    while let Some(event) = rx.recv().await {
        presenter.handle(&event);
    }
}

/// Turns receiver events into log lines, throttling progress to every
/// tenth of the transfer.
#[derive(Debug, Default)]
struct Presenter {
    last_decile: Option<u64>,
}

impl Presenter {
    fn handle(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Listening { addr } => {
                self.last_decile = None;
                info!(%addr, "listening");
            }
            TransferEvent::Accepted { peer } => info!(%peer, "connection accepted"),
            TransferEvent::Status(text) => info!("{text}"),
            TransferEvent::Progress {
                bytes_received,
                total_bytes,
            } => {
                if let Some(percent) = self.progress_step(*bytes_received, *total_bytes) {
                    info!(bytes_received, total_bytes, "received {percent}%");
                } else {
                    debug!(bytes_received, total_bytes, "progress");
                }
            }
            TransferEvent::Completed(summary) => info!(
                file = %summary.file_name,
                path = %summary.path.display(),
                bytes = summary.bytes,
                sha256 = %summary.sha256,
                "file received"
            ),
            TransferEvent::Failed { kind, message } => {
                if is_session_local(*kind) {
                    warn!(%kind, "transfer failed: {message}");
                } else {
                    error!(%kind, "{message}");
                }
            }
        }
    }

    /// Returns the percentage to report when a new tenth has been crossed.
    fn progress_step(&mut self, bytes_received: u64, total_bytes: u64) -> Option<u64> {
        let percent = percent(bytes_received, total_bytes);
        let decile = percent / 10;
        if self.last_decile.is_some_and(|last| last >= decile) {
            return None;
        }
        self.last_decile = Some(decile);
        Some(percent)
    }
}

fn percent(bytes_received: u64, total_bytes: u64) -> u64 {
    if total_bytes == 0 {
        return 100;
    }
    (u128::from(bytes_received) * 100 / u128::from(total_bytes)) as u64
}
