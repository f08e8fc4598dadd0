//! Length-prefixed stream framing for the TCP transport.
//!
//! A frame is a 4-byte big-endian unsigned length followed by exactly that
//! many bytes of UTF-8 JSON. [`FrameReader`] accumulates partial socket
//! reads and surfaces a frame only once it is fully buffered, so a message
//! split across any number of read callbacks decodes exactly once.

use crate::error::ProtoError;

const LEN_PREFIX_SIZE: usize = 4;

/// Upper bound on a single frame's payload. A prefix above this (or a
/// zero-length prefix) means the stream is corrupt; the transport drops the
/// connection rather than attempting to resynchronize.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Prefix *payload* with its big-endian length, serializing into one buffer.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtoError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtoError::FrameTooLarge(payload.len()))?;
    let mut framed = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Stateful accumulator turning a byte stream into complete frames.
///
/// Push raw socket bytes with [`push`](Self::push), then drain with
/// [`next_frame`](Self::next_frame) until it yields `None`. State survives
/// across pushes; [`reset`](Self::reset) discards it on disconnect.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
    pending_len: Option<usize>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next complete frame, if one is fully buffered.
    ///
    /// Returns `Ok(None)` while a frame is still partial. A zero or
    /// oversized length prefix is unrecoverable: the reader clears its
    /// state and the caller must drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtoError> {
        if self.pending_len.is_none() {
            if self.buffer.len() < LEN_PREFIX_SIZE {
                return Ok(None);
            }
            let mut prefix = [0u8; LEN_PREFIX_SIZE];
            prefix.copy_from_slice(&self.buffer[..LEN_PREFIX_SIZE]);
            let declared = u32::from_be_bytes(prefix);
            if declared == 0 || declared as usize > MAX_FRAME_LEN {
                self.reset();
                return Err(ProtoError::InvalidFrameLength(declared));
            }
            self.buffer.drain(..LEN_PREFIX_SIZE);
            self.pending_len = Some(declared as usize);
        }

        match self.pending_len {
            Some(len) if self.buffer.len() >= len => {
                let frame = self.buffer.drain(..len).collect();
                self.pending_len = None;
                Ok(Some(frame))
            }
            _ => Ok(None),
        }
    }

    /// Discard any partially received frame, e.g. on disconnect.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_len = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_frame_prefixes_payload_length() {
        let framed = encode_frame(b"hello").expect("encode frame");
        assert_eq!(&framed[..4], &5u32.to_be_bytes());
        assert_eq!(&framed[4..], b"hello");
    }

    #[test]
    fn split_write_yields_exactly_one_frame() {
        // A 40-byte JSON message arriving as a 10-byte chunk then the rest.
        let payload = br#"{"id":"xx","topic":"t","data":{"k":"v"}}"#;
        assert_eq!(payload.len(), 40);
        let framed = encode_frame(payload).expect("encode frame");

        let mut reader = FrameReader::new();
        reader.push(&framed[..10]);
        assert!(reader.next_frame().expect("partial read").is_none());

        reader.push(&framed[10..]);
        let frame = reader.next_frame().expect("read frame").expect("one frame");
        assert_eq!(frame, payload);
        assert!(reader.next_frame().expect("drained").is_none());
    }

    #[test]
    fn multiple_frames_in_one_push_drain_in_order() {
        let mut bytes = encode_frame(b"first").expect("encode frame");
        bytes.extend_from_slice(&encode_frame(b"second").expect("encode frame"));

        let mut reader = FrameReader::new();
        reader.push(&bytes);
        assert_eq!(reader.next_frame().expect("frame").expect("first"), b"first");
        assert_eq!(reader.next_frame().expect("frame").expect("second"), b"second");
        assert!(reader.next_frame().expect("drained").is_none());
    }

    #[test]
    fn byte_at_a_time_delivery_still_decodes() {
        let framed = encode_frame(b"slow peer").expect("encode frame");
        let mut reader = FrameReader::new();
        let mut frames = Vec::new();
        for byte in framed {
            reader.push(&[byte]);
            if let Some(frame) = reader.next_frame().expect("read frame") {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![b"slow peer".to_vec()]);
    }

    #[test]
    fn zero_length_prefix_is_a_framing_error() {
        let mut reader = FrameReader::new();
        reader.push(&0u32.to_be_bytes());
        let err = reader.next_frame().expect_err("zero prefix must fail");
        assert!(matches!(err, ProtoError::InvalidFrameLength(0)));
        // State was cleared; the reader is reusable after a reconnect.
        reader.push(&encode_frame(b"ok").expect("encode frame"));
        assert_eq!(reader.next_frame().expect("frame").expect("payload"), b"ok");
    }

    #[test]
    fn oversized_prefix_is_a_framing_error() {
        let mut reader = FrameReader::new();
        reader.push(&u32::MAX.to_be_bytes());
        let err = reader.next_frame().expect_err("oversized prefix must fail");
        assert!(matches!(err, ProtoError::InvalidFrameLength(_)));
    }

    #[test]
    fn reset_discards_partial_state() {
        let framed = encode_frame(b"interrupted").expect("encode frame");
        let mut reader = FrameReader::new();
        reader.push(&framed[..6]);
        assert!(reader.next_frame().expect("partial").is_none());

        reader.reset();
        reader.push(&encode_frame(b"fresh").expect("encode frame"));
        assert_eq!(reader.next_frame().expect("frame").expect("payload"), b"fresh");
    }
}
