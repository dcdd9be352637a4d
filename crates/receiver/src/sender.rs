//! Sending side: streams one local file to a receiver.

use std::net::SocketAddr;
use std::path::Path;

use tcpfile_wire::{TransferHeader, write_transfer_header};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::TransferError;
use crate::{DEFAULT_READ_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

/// Connects to `addr` and sends the file at `local_path`.
///
/// The announced name defaults to the file name component of `local_path`.
/// Returns the number of body bytes sent.
pub async fn send_file(
    addr: SocketAddr,
    local_path: &Path,
    file_name: Option<&str>,
) -> Result<u64, TransferError> {
    let open_err = |source| TransferError::FileOpen {
        path: local_path.to_path_buf(),
        source,
    };

    let name = match file_name {
        Some(name) => name.to_string(),
        None => local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransferError::InvalidPath(format!(
                    "no usable file name in {}",
                    local_path.display()
                ))
            })?
            .to_string(),
    };

    let file = tokio::fs::File::open(local_path).await.map_err(open_err)?;
    let total_bytes = file.metadata().await.map_err(open_err)?.len();

    let stream = match tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(TransferError::Socket(e)),
        Err(_) => {
            return Err(TransferError::Socket(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {addr} timed out"),
            )));
        }
    };
    info!(%addr, file = %name, total_bytes, "connected, sending file");

    let header = TransferHeader::new(total_bytes, name);
    let mut writer = BufWriter::with_capacity(DEFAULT_READ_BUFFER_SIZE, stream);
    let sent = send_stream(&mut writer, &header, file).await?;
    writer.shutdown().await.map_err(TransferError::Socket)?;

    info!(%addr, bytes = sent, "file sent");
    Ok(sent)
}

/// Writes `header` followed by exactly `header.total_bytes` bytes from
/// `body` to `writer`.
pub async fn send_stream<W, R>(
    writer: &mut W,
    header: &TransferHeader,
    mut body: R,
) -> Result<u64, TransferError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    write_transfer_header(writer, header).await?;

    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    let mut remaining = header.total_bytes;
    while remaining > 0 {
        let to_read = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = body.read(&mut buf[..to_read]).await?;
        if n == 0 {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "source ended before the announced size",
            )));
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(TransferError::Socket)?;
        remaining -= n as u64;
    }
    writer.flush().await.map_err(TransferError::Socket)?;

    debug!(file = %header.file_name, size = header.total_bytes, "body sent");
    Ok(header.total_bytes)
}
