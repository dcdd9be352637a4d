//! Transfer header and its sender-side encoding.
//!
//! # Wire format
//!
//! ```text
//! [8 bytes BE: total_bytes]
//! [8 bytes BE: file_name_len]
//! [file_name_len bytes: file_name UTF-8]
//! [total_bytes bytes: raw file data]
//! ```

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::WireError;
use crate::{HEADER_LENGTHS_LEN, MAX_FILE_NAME_LEN};

/// The prefix of a transfer: body size and destination file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    /// Exact number of body bytes that follow the name.
    pub total_bytes: u64,
    /// Destination file name (UTF-8).
    pub file_name: String,
}

impl TransferHeader {
    pub fn new(total_bytes: u64, file_name: impl Into<String>) -> Self {
        Self {
            total_bytes,
            file_name: file_name.into(),
        }
    }

    /// Byte length of the encoded file name.
    pub fn file_name_length(&self) -> u64 {
        self.file_name.len() as u64
    }

    /// Number of bytes the header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LENGTHS_LEN + self.file_name.len()
    }

    /// Checks the name against the limits the decoder enforces.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.file_name.is_empty() {
            return Err(WireError::ZeroLengthName);
        }
        if self.file_name.len() > MAX_FILE_NAME_LEN {
            return Err(WireError::NameTooLong {
                len: self.file_name_length(),
                max: MAX_FILE_NAME_LEN,
            });
        }
        Ok(())
    }

    /// Appends the encoded header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        self.validate()?;
        dst.reserve(self.encoded_len());
        dst.put_u64(self.total_bytes);
        dst.put_u64(self.file_name_length());
        dst.put_slice(self.file_name.as_bytes());
        Ok(())
    }
}

/// Writes a transfer header to the stream.
pub async fn write_transfer_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &TransferHeader,
) -> Result<(), WireError> {
    let mut buf = BytesMut::new();
    header.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}
