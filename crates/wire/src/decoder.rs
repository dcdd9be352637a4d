//! Incremental decoder for the receiving side of a transfer.
//!
//! [`FrameDecoder`] accepts arbitrarily fragmented input and walks through
//! the header stages before forwarding body bytes untouched. It can be
//! driven chunk by chunk with [`FrameDecoder::feed`] or placed under a
//! [`tokio_util::codec::FramedRead`].

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::error::WireError;
use crate::{HEADER_LENGTHS_LEN, MAX_FILE_NAME_LEN};

/// Stage of the decoder within a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Waiting for the 16-byte `(total_bytes, file_name_len)` pair.
    AwaitingHeaderLengths,
    /// Waiting for all `file_name_len` name bytes.
    AwaitingFileName,
    /// Forwarding body bytes until `total_bytes` have passed through.
    StreamingBody,
    /// The whole transfer has been decoded.
    Complete,
    /// A decode error occurred; the stream cannot be resynchronised.
    Failed,
}

/// Output of the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Nothing completed; the buffered bytes wait for the next chunk.
    NeedMoreData,
    /// The header is fully known.
    HeaderReady { total_bytes: u64, file_name: String },
    /// Body bytes, in stream order, never beyond `total_bytes`.
    BodyChunk(Bytes),
    /// The last body byte has been forwarded.
    Done,
}

/// Incremental state machine turning a byte stream into header fields and
/// body chunks.
///
/// Any error moves the decoder to [`DecoderState::Failed`], where every
/// further call reports [`WireError::Poisoned`] until [`reset`](Self::reset).
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    pending: BytesMut,
    total_bytes: u64,
    file_name_len: usize,
    body_received: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitingHeaderLengths,
            pending: BytesMut::new(),
            total_bytes: 0,
            file_name_len: 0,
            body_received: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Announced body size, once the header lengths have been decoded.
    pub fn total_bytes(&self) -> Option<u64> {
        match self.state {
            DecoderState::AwaitingHeaderLengths => None,
            _ => Some(self.total_bytes),
        }
    }

    /// Body bytes forwarded so far.
    pub fn body_received(&self) -> u64 {
        self.body_received
    }

    /// Body bytes still expected.
    pub fn body_remaining(&self) -> u64 {
        self.total_bytes - self.body_received
    }

    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.state == DecoderState::Failed
    }

    /// Bytes held back by [`feed`](Self::feed) waiting for a stage to fill.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Discards all progress and buffered bytes.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Appends `chunk` to the internal buffer and returns the events it
    /// completes, in order.
    ///
    /// Every stage that the buffered bytes satisfy is processed, so a single
    /// chunk may yield `HeaderReady`, `BodyChunk` and `Done` together. When
    /// nothing completes the iterator yields one [`DecoderEvent::NeedMoreData`].
    /// Feeding a complete decoder yields [`WireError::AlreadyComplete`].
    pub fn feed(&mut self, chunk: &[u8]) -> Feed<'_> {
        let rejected = self.is_complete();
        if !rejected && !self.is_failed() {
            self.pending.extend_from_slice(chunk);
        }
        Feed {
            decoder: self,
            rejected,
            emitted: false,
            finished: false,
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    fn decode_stage(&mut self, src: &mut BytesMut) -> Result<Option<DecoderEvent>, WireError> {
        loop {
            match self.state {
                DecoderState::AwaitingHeaderLengths => {
                    if src.len() < HEADER_LENGTHS_LEN {
                        src.reserve(HEADER_LENGTHS_LEN - src.len());
                        return Ok(None);
                    }

                    let total_bytes = src.get_u64();
                    let name_len = src.get_u64();
                    if name_len == 0 {
                        return Err(WireError::ZeroLengthName);
                    }
                    if name_len > MAX_FILE_NAME_LEN as u64 {
                        return Err(WireError::NameTooLong {
                            len: name_len,
                            max: MAX_FILE_NAME_LEN,
                        });
                    }

                    debug!(total_bytes, name_len, "transfer lengths decoded");
                    self.total_bytes = total_bytes;
                    self.file_name_len = name_len as usize;
                    self.state = DecoderState::AwaitingFileName;
                }

                DecoderState::AwaitingFileName => {
                    if src.len() < self.file_name_len {
                        src.reserve(self.file_name_len - src.len());
                        return Ok(None);
                    }

                    let raw = src.split_to(self.file_name_len);
                    let file_name = String::from_utf8(raw.to_vec())?;
                    self.state = DecoderState::StreamingBody;
                    return Ok(Some(DecoderEvent::HeaderReady {
                        total_bytes: self.total_bytes,
                        file_name,
                    }));
                }

                DecoderState::StreamingBody => {
                    let remaining = self.body_remaining();
                    if remaining == 0 {
                        if !src.is_empty() {
                            return Err(WireError::TrailingBytes { extra: src.len() });
                        }
                        self.state = DecoderState::Complete;
                        return Ok(Some(DecoderEvent::Done));
                    }

                    if src.is_empty() {
                        return Ok(None);
                    }

                    let take = usize::try_from(remaining).map_or(src.len(), |r| r.min(src.len()));
                    let chunk = src.split_to(take).freeze();
                    self.body_received += take as u64;
                    return Ok(Some(DecoderEvent::BodyChunk(chunk)));
                }

                DecoderState::Complete => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    return Err(WireError::AlreadyComplete);
                }

                DecoderState::Failed => return Err(WireError::Poisoned),
            }
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = DecoderEvent;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DecoderEvent>, WireError> {
        let result = self.decode_stage(src);
        if result.is_err() && self.state != DecoderState::Complete {
            self.state = DecoderState::Failed;
        }
        result
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<DecoderEvent>, WireError> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }

        match self.state {
            DecoderState::Complete => Ok(None),
            DecoderState::Failed => Err(WireError::Poisoned),
            DecoderState::StreamingBody => Err(WireError::Truncated {
                received: self.body_received,
                expected: self.total_bytes,
            }),
            DecoderState::AwaitingHeaderLengths | DecoderState::AwaitingFileName => {
                Err(WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside the transfer header",
                )))
            }
        }
    }
}

/// Events produced by one [`FrameDecoder::feed`] call.
pub struct Feed<'a> {
    decoder: &'a mut FrameDecoder,
    rejected: bool,
    emitted: bool,
    finished: bool,
}

impl Iterator for Feed<'_> {
    type Item = Result<DecoderEvent, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.rejected {
            self.finished = true;
            return Some(Err(WireError::AlreadyComplete));
        }

        let mut pending = std::mem::take(&mut self.decoder.pending);
        let result = self.decoder.decode(&mut pending);
        self.decoder.pending = pending;

        match result {
            Ok(Some(event)) => {
                self.emitted = true;
                Some(Ok(event))
            }
            Ok(None) => {
                self.finished = true;
                (!self.emitted).then_some(Ok(DecoderEvent::NeedMoreData))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use rand::Rng;
    use tokio_util::codec::FramedRead;

    use super::*;
    use crate::TransferHeader;

    fn encode_transfer(name: &str, body: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        TransferHeader::new(body.len() as u64, name)
            .encode(&mut buf)
            .unwrap();
        buf.extend_from_slice(body);
        buf.to_vec()
    }

    /// What a consumer would end up with: header fields, body bytes, done flag.
    #[derive(Debug, Default, PartialEq)]
    struct Outcome {
        total_bytes: Option<u64>,
        file_name: Option<String>,
        body: Vec<u8>,
        done: bool,
    }

    fn drive<'a>(
        decoder: &mut FrameDecoder,
        chunks: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<Outcome, WireError> {
        let mut out = Outcome::default();
        for chunk in chunks {
            for event in decoder.feed(chunk) {
                match event? {
                    DecoderEvent::NeedMoreData => {}
                    DecoderEvent::HeaderReady {
                        total_bytes,
                        file_name,
                    } => {
                        out.total_bytes = Some(total_bytes);
                        out.file_name = Some(file_name);
                    }
                    DecoderEvent::BodyChunk(bytes) => out.body.extend_from_slice(&bytes),
                    DecoderEvent::Done => out.done = true,
                }
            }
        }
        Ok(out)
    }

    #[test]
    fn hello_world_in_three_splits() {
        let stream = encode_transfer("hi.md", b"Hello, world!");
        let mut decoder = FrameDecoder::new();

        let out = drive(
            &mut decoder,
            [&stream[..10], &stream[10..19], &stream[19..]],
        )
        .unwrap();

        assert_eq!(out.total_bytes, Some(13));
        assert_eq!(out.file_name.as_deref(), Some("hi.md"));
        assert_eq!(out.body, b"Hello, world!");
        assert!(out.done);
        assert_eq!(decoder.state(), DecoderState::Complete);
        assert_eq!(decoder.body_received(), 13);
    }

    #[test]
    fn one_call_matches_byte_at_a_time() {
        let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let stream = encode_transfer("data.bin", &body);

        let whole = drive(&mut FrameDecoder::new(), [&stream[..]]).unwrap();
        let bytewise = drive(&mut FrameDecoder::new(), stream.chunks(1)).unwrap();

        assert_eq!(whole, bytewise);
        assert_eq!(whole.body, body);
        assert!(whole.done);
    }

    #[test]
    fn random_splits_reconstruct_the_same_transfer() {
        let mut rng = rand::thread_rng();
        let mut body = vec![0u8; 4096];
        rng.fill(&mut body[..]);
        let stream = encode_transfer("random.bin", &body);
        let expected = drive(&mut FrameDecoder::new(), [&stream[..]]).unwrap();

        for _ in 0..50 {
            let mut chunks = Vec::new();
            let mut rest = &stream[..];
            while !rest.is_empty() {
                let n = rng.gen_range(0..=rest.len().min(64));
                let (head, tail) = rest.split_at(n);
                chunks.push(head);
                rest = tail;
            }
            let out = drive(&mut FrameDecoder::new(), chunks).unwrap();
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn partial_lengths_are_buffered() {
        let stream = encode_transfer("a.txt", b"hello");
        let mut decoder = FrameDecoder::new();

        let events: Vec<_> = decoder.feed(&stream[..15]).collect();
        assert!(matches!(events.as_slice(), [Ok(DecoderEvent::NeedMoreData)]));
        assert_eq!(decoder.state(), DecoderState::AwaitingHeaderLengths);
        assert_eq!(decoder.buffered(), 15);
        assert_eq!(decoder.total_bytes(), None);
    }

    #[test]
    fn partial_name_exposes_no_name() {
        let stream = encode_transfer("a.txt", b"hello");
        let mut decoder = FrameDecoder::new();

        let events: Vec<_> = decoder.feed(&stream[..18]).collect();
        assert!(matches!(events.as_slice(), [Ok(DecoderEvent::NeedMoreData)]));
        assert_eq!(decoder.state(), DecoderState::AwaitingFileName);
        assert_eq!(decoder.total_bytes(), Some(5));
    }

    #[test]
    fn one_chunk_completes_every_stage() {
        let stream = encode_transfer("a.txt", b"hello");
        let mut decoder = FrameDecoder::new();

        let events: Vec<_> = decoder
            .feed(&stream[..stream.len() - 2])
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            events,
            vec![
                DecoderEvent::HeaderReady {
                    total_bytes: 5,
                    file_name: "a.txt".into(),
                },
                DecoderEvent::BodyChunk(Bytes::from_static(b"hel")),
            ]
        );
        assert_eq!(decoder.state(), DecoderState::StreamingBody);
        assert_eq!(decoder.body_remaining(), 2);
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut decoder = FrameDecoder::new();
        let events: Vec<_> = decoder.feed(&[]).collect();
        assert!(matches!(events.as_slice(), [Ok(DecoderEvent::NeedMoreData)]));
        assert_eq!(decoder.state(), DecoderState::AwaitingHeaderLengths);
    }

    #[test]
    fn zero_length_name_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&5u64.to_be_bytes());
        stream.extend_from_slice(&0u64.to_be_bytes());
        stream.extend_from_slice(b"hello");

        let mut decoder = FrameDecoder::new();
        let result = drive(&mut decoder, [&stream[..]]);
        assert!(matches!(result, Err(WireError::ZeroLengthName)));
    }

    #[test]
    fn oversized_name_rejected_before_buffering() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&5u64.to_be_bytes());
        stream.extend_from_slice(&u64::MAX.to_be_bytes());

        let mut decoder = FrameDecoder::new();
        let result = drive(&mut decoder, [&stream[..]]);
        assert!(matches!(
            result,
            Err(WireError::NameTooLong { len: u64::MAX, .. })
        ));
    }

    #[test]
    fn invalid_utf8_name_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&0u64.to_be_bytes());
        stream.extend_from_slice(&2u64.to_be_bytes());
        stream.extend_from_slice(&[0xff, 0xfe]);

        let result = drive(&mut FrameDecoder::new(), [&stream[..]]);
        assert!(matches!(result, Err(WireError::InvalidName(_))));
    }

    #[test]
    fn empty_body_completes_immediately() {
        let stream = encode_transfer("empty.txt", b"");
        let mut decoder = FrameDecoder::new();

        let events: Vec<_> = decoder.feed(&stream).map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                DecoderEvent::HeaderReady {
                    total_bytes: 0,
                    file_name: "empty.txt".into(),
                },
                DecoderEvent::Done,
            ]
        );
        assert!(decoder.is_complete());
    }

    #[test]
    fn trailing_bytes_detected_after_last_body_byte() {
        let mut stream = encode_transfer("a.txt", b"hello");
        stream.extend_from_slice(b"XYZ");
        let mut decoder = FrameDecoder::new();

        let events: Vec<_> = decoder.feed(&stream).collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Ok(DecoderEvent::HeaderReady { .. })));
        assert!(matches!(&events[1], Ok(DecoderEvent::BodyChunk(b)) if &b[..] == b"hello"));
        assert!(matches!(events[2], Err(WireError::TrailingBytes { extra: 3 })));
        assert_eq!(decoder.body_received(), 5);
        assert!(!decoder.is_complete());
        assert!(decoder.is_failed());
    }

    #[test]
    fn rejected_header_poisons_the_decoder() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&5u64.to_be_bytes());
        stream.extend_from_slice(&0u64.to_be_bytes());

        let mut decoder = FrameDecoder::new();
        let result = drive(&mut decoder, [&stream[..]]);
        assert!(matches!(result, Err(WireError::ZeroLengthName)));
        assert_eq!(decoder.state(), DecoderState::Failed);

        // Sixteen more bytes would form a plausible header; they are refused.
        let mut next = Vec::new();
        next.extend_from_slice(&1u64.to_be_bytes());
        next.extend_from_slice(&1u64.to_be_bytes());
        next.push(b'x');
        let events: Vec<_> = decoder.feed(&next).collect();
        assert!(matches!(events.as_slice(), [Err(WireError::Poisoned)]));
        assert_eq!(decoder.buffered(), 0);

        decoder.reset();
        next.push(b'!');
        let outcome = drive(&mut decoder, [&next[..]]).unwrap();
        assert_eq!(outcome.file_name.as_deref(), Some("x"));
        assert!(outcome.done);
    }

    #[test]
    fn oversized_name_poisons_the_decoder() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&5u64.to_be_bytes());
        stream.extend_from_slice(&(MAX_FILE_NAME_LEN as u64 + 1).to_be_bytes());

        let mut decoder = FrameDecoder::new();
        assert!(drive(&mut decoder, [&stream[..]]).is_err());
        assert!(decoder.is_failed());

        let mut src = BytesMut::from(&b"anything"[..]);
        assert!(matches!(decoder.decode(&mut src), Err(WireError::Poisoned)));
        assert!(matches!(
            decoder.decode_eof(&mut BytesMut::new()),
            Err(WireError::Poisoned)
        ));
    }

    #[test]
    fn feed_after_complete_rejected() {
        let stream = encode_transfer("a.txt", b"hello");
        let mut decoder = FrameDecoder::new();
        drive(&mut decoder, [&stream[..]]).unwrap();

        let events: Vec<_> = decoder.feed(b"more").collect();
        assert!(matches!(events.as_slice(), [Err(WireError::AlreadyComplete)]));

        let events: Vec<_> = decoder.feed(&[]).collect();
        assert!(matches!(events.as_slice(), [Err(WireError::AlreadyComplete)]));
    }

    #[test]
    fn reset_clears_previous_transfer() {
        let stream = encode_transfer("a.txt", b"hello");
        let mut decoder = FrameDecoder::new();
        drive(&mut decoder, [&stream[..20]]).unwrap();

        decoder.reset();
        assert_eq!(decoder.state(), DecoderState::AwaitingHeaderLengths);
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(decoder.body_received(), 0);

        let out = drive(&mut decoder, [&stream[..]]).unwrap();
        assert_eq!(out.body, b"hello");
    }

    #[tokio::test]
    async fn framed_read_decodes_a_stream() {
        let stream = encode_transfer("hi.md", b"Hello, world!");
        let mut framed = FramedRead::new(&stream[..], FrameDecoder::new());

        let mut body = Vec::new();
        let mut done = false;
        while let Some(event) = framed.next().await {
            match event.unwrap() {
                DecoderEvent::BodyChunk(bytes) => body.extend_from_slice(&bytes),
                DecoderEvent::Done => done = true,
                _ => {}
            }
        }
        assert!(done);
        assert_eq!(body, b"Hello, world!");
    }

    #[tokio::test]
    async fn framed_read_reports_truncated_body() {
        let stream = encode_transfer("hi.md", b"Hello, world!");
        let cut = &stream[..stream.len() - 4];
        let mut framed = FramedRead::new(cut, FrameDecoder::new());

        let mut last = None;
        while let Some(event) = framed.next().await {
            if let Err(e) = event {
                last = Some(e);
                break;
            }
        }
        assert!(matches!(
            last,
            Some(WireError::Truncated {
                received: 9,
                expected: 13
            })
        ));
    }
}
