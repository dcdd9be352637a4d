//! Wire format for single-file TCP transfers.
//!
//! A sender writes one header followed by the raw file bytes; the receiver
//! reassembles the header from whatever fragments the network delivers.
//! See [`header`] for the byte layout and [`decoder`] for the receiving
//! state machine.

pub mod decoder;
pub mod error;
pub mod header;

pub use decoder::{DecoderEvent, DecoderState, Feed, FrameDecoder};
pub use error::WireError;
pub use header::{TransferHeader, write_transfer_header};

/// Size of the fixed `(total_bytes, file_name_len)` prefix.
pub const HEADER_LENGTHS_LEN: usize = 2 * size_of::<u64>();

/// Longest file name accepted on the wire, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 4096;
