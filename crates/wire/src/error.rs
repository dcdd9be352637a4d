//! Error types for the wire format.

/// Errors produced while decoding or encoding a transfer stream.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zero-length file name")]
    ZeroLengthName,

    #[error("file name too long: {len} bytes (max {max})")]
    NameTooLong { len: u64, max: usize },

    #[error("invalid UTF-8 file name: {0}")]
    InvalidName(#[from] std::string::FromUtf8Error),

    #[error("{extra} bytes past the announced end of the body")]
    TrailingBytes { extra: usize },

    #[error("decoder already complete")]
    AlreadyComplete,

    #[error("decoder failed earlier in this stream")]
    Poisoned,

    #[error("stream ended early: {received} of {expected} body bytes")]
    Truncated { received: u64, expected: u64 },
}
