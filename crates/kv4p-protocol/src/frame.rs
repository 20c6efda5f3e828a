//! Frame encoder and incremental decoder.
//!
//! Every message between host and dongle, in either direction, uses the
//! same envelope:
//!
//! ```text
//! DE AD BE EF <code> <len lo> <len hi> <payload ...>
//! ```
//!
//! - Sync: the four bytes `DE AD BE EF`
//! - `code`: command code (host to dongle) or response code (dongle to host)
//! - `len`: payload length, `u16` little-endian
//! - `payload`: exactly `len` bytes
//!
//! The serial link hands bytes over in arbitrary chunks, so [`FrameDecoder`]
//! is a byte-at-a-time state machine that keeps its position across calls to
//! [`feed`](FrameDecoder::feed). Bytes that do not fit the sync pattern are
//! collected and reported once the pattern resumes.

use bytes::{BufMut, Bytes, BytesMut};
use kv4p_core::{Error, Result};

/// Frame sync marker.
pub const SYNC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// Bytes in a frame before the payload.
pub const HEADER_LEN: usize = 7;

/// Largest payload a frame can declare.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// One complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command or response code.
    pub code: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Frame {
            code,
            payload: payload.into(),
        }
    }

    /// Bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_frame(self.code, &self.payload)
    }
}

/// Encode a frame into raw bytes ready for transmission.
///
/// Fails with [`Error::InvalidParameter`] if the payload does not fit the
/// 16-bit length field.
///
/// # Example
///
/// ```
/// use kv4p_protocol::frame::encode_frame;
///
/// // CONFIG, VHF module
/// let bytes = encode_frame(0x06, &[0x04]).unwrap();
/// assert_eq!(bytes, vec![0xDE, 0xAD, 0xBE, 0xEF, 0x06, 0x01, 0x00, 0x04]);
/// ```
pub fn encode_frame(code: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::InvalidParameter(format!(
            "payload of {} bytes exceeds frame limit of {MAX_PAYLOAD}",
            payload.len()
        ))
    })?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&SYNC);
    buf.put_u8(code);
    buf.put_u16_le(len);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for `SYNC[n]`.
    Sync(usize),
    Command,
    LenLo,
    LenHi,
    Payload,
}

/// Incremental frame decoder.
///
/// # Example
///
/// ```
/// use kv4p_protocol::frame::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// // A HELLO frame split across two reads.
/// assert!(decoder.feed(&[0xDE, 0xAD, 0xBE]).is_empty());
/// let frames = decoder.feed(&[0xEF, 0x06, 0x00, 0x00]);
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].code, 0x06);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    code: u8,
    expected: usize,
    payload: BytesMut,
    skipped: Vec<u8>,
    skipped_total: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            state: DecodeState::Sync(0),
            code: 0,
            expected: 0,
            payload: BytesMut::new(),
            skipped: Vec::new(),
            skipped_total: 0,
        }
    }

    /// Feed received bytes, returning every frame they complete in arrival
    /// order. Partial frames are kept for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in data {
            if let Some(frame) = self.push(byte) {
                frames.push(frame);
            }
        }
        frames
    }

    fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            DecodeState::Sync(n) => {
                if byte == SYNC[n] {
                    self.flush_skipped();
                    self.state = if n + 1 == SYNC.len() {
                        DecodeState::Command
                    } else {
                        DecodeState::Sync(n + 1)
                    };
                } else {
                    self.skipped.push(byte);
                }
                None
            }
            DecodeState::Command => {
                self.code = byte;
                self.state = DecodeState::LenLo;
                None
            }
            DecodeState::LenLo => {
                self.expected = usize::from(byte);
                self.state = DecodeState::LenHi;
                None
            }
            DecodeState::LenHi => {
                self.expected |= usize::from(byte) << 8;
                if self.expected == 0 {
                    return Some(self.finish());
                }
                self.payload.reserve(self.expected);
                self.state = DecodeState::Payload;
                None
            }
            DecodeState::Payload => {
                self.payload.put_u8(byte);
                if self.payload.len() == self.expected {
                    Some(self.finish())
                } else {
                    None
                }
            }
        }
    }

    fn finish(&mut self) -> Frame {
        let payload = self.payload.split().freeze();
        self.state = DecodeState::Sync(0);
        self.expected = 0;
        Frame {
            code: self.code,
            payload,
        }
    }

    fn flush_skipped(&mut self) {
        if self.skipped.is_empty() {
            return;
        }
        tracing::warn!(
            count = self.skipped.len(),
            "Skipped bytes before sync: {:02X?}",
            self.skipped
        );
        self.skipped_total += self.skipped.len() as u64;
        self.skipped.clear();
    }

    /// Total bytes discarded while hunting for sync.
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.state == DecodeState::Sync(0) && self.skipped.is_empty()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: [u8; 7] = [0xDE, 0xAD, 0xBE, 0xEF, 0x06, 0x00, 0x00];

    #[test]
    fn encode_empty_payload() {
        assert_eq!(encode_frame(0x05, &[]).unwrap(), vec![
            0xDE, 0xAD, 0xBE, 0xEF, 0x05, 0x00, 0x00
        ]);
    }

    #[test]
    fn encode_length_little_endian() {
        let payload = vec![0xAA; 0x0102];
        let bytes = encode_frame(0x07, &payload).unwrap();
        assert_eq!(&bytes[4..7], &[0x07, 0x02, 0x01]);
        assert_eq!(bytes.len(), HEADER_LEN + 0x0102);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            encode_frame(0x07, &payload),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn encode_accepts_max_payload() {
        let payload = vec![0u8; MAX_PAYLOAD];
        let bytes = encode_frame(0x07, &payload).unwrap();
        assert_eq!(&bytes[5..7], &[0xFF, 0xFF]);
    }

    #[test]
    fn decode_encoded_frames() {
        let cases: &[(u8, &[u8])] = &[
            (0x06, &[]),
            (0x53, &[0x80]),
            (0x09, &[0x00, 0x04, 0x00, 0x00]),
            (0x07, &[0xDE, 0xAD, 0xBE, 0xEF, 0x00]),
        ];
        let mut decoder = FrameDecoder::new();
        for &(code, payload) in cases {
            let frames = decoder.feed(&encode_frame(code, payload).unwrap());
            assert_eq!(frames, vec![Frame::new(code, payload.to_vec())]);
            assert!(decoder.is_idle());
        }
        assert_eq!(decoder.skipped_total(), 0);
    }

    #[test]
    fn decode_max_payload() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD).map(|i| i as u8).collect();
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&encode_frame(0x07, &payload).unwrap());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn decode_byte_at_a_time() {
        let bytes = encode_frame(0x08, &[0x05, 0x00, 0x4F, 0x02, 0x00, 0x04, 0x00, 0x00]).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for b in &bytes {
            frames.extend(decoder.feed(std::slice::from_ref(b)));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].code, 0x08);
        assert_eq!(frames[0].payload.len(), 8);
    }

    #[test]
    fn decode_back_to_back_frames() {
        let mut bytes = HELLO.to_vec();
        bytes.extend(encode_frame(0x53, &[0x40]).unwrap());
        bytes.extend(HELLO);

        let mut decoder = FrameDecoder::new();
        let codes: Vec<u8> = decoder.feed(&bytes).iter().map(|f| f.code).collect();
        assert_eq!(codes, vec![0x06, 0x53, 0x06]);
    }

    #[test]
    fn resync_inside_marker() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&[0xDE, 0xAD, 0x77, 0xBE, 0xEF, 0x06, 0x00, 0x00]);
        assert_eq!(frames, vec![Frame::new(0x06, Bytes::new())]);
        assert_eq!(decoder.skipped_total(), 1);
    }

    #[test]
    fn resync_after_leading_garbage() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = vec![0x11, 0x22, 0x33];
        bytes.extend(HELLO);
        let frames = decoder.feed(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.skipped_total(), 3);
    }

    #[test]
    fn garbage_is_counted_only_once_sync_resumes() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&[0x01, 0x02]).is_empty());
        assert_eq!(decoder.skipped_total(), 0);
        assert!(!decoder.is_idle());
        decoder.feed(&HELLO);
        assert_eq!(decoder.skipped_total(), 2);
    }

    #[test]
    fn frame_wire_len() {
        let frame = Frame::new(0x03, vec![0u8; 12]);
        assert_eq!(frame.wire_len(), 19);
        assert_eq!(frame.encode().unwrap().len(), 19);
    }

    mod properties {
        use proptest::collection::vec;
        use proptest::prelude::*;
        use proptest::sample::Index;

        use super::super::*;

        fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
            prop_oneof![
                4 => vec(any::<u8>(), 0..=2048),
                1 => vec(any::<u8>(), MAX_PAYLOAD - 16..=MAX_PAYLOAD),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            #[test]
            fn decodes_any_frame_however_it_is_split(
                code in any::<u8>(),
                payload in payload_strategy(),
                cuts in vec(any::<Index>(), 0..8),
            ) {
                let bytes = encode_frame(code, &payload).unwrap();
                let mut cuts: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len())).collect();
                cuts.sort_unstable();

                let mut decoder = FrameDecoder::new();
                let mut frames = Vec::new();
                let mut start = 0;
                for cut in cuts.into_iter().chain([bytes.len()]) {
                    frames.extend(decoder.feed(&bytes[start..cut]));
                    start = cut;
                }

                prop_assert_eq!(frames.len(), 1);
                prop_assert_eq!(frames[0].code, code);
                prop_assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
                prop_assert!(decoder.is_idle());
                prop_assert_eq!(decoder.skipped_total(), 0);
            }

            #[test]
            fn leading_garbage_is_skipped_and_counted(
                garbage in vec(any::<u8>().prop_filter("not a sync start", |b| *b != 0xDE), 0..64),
                code in any::<u8>(),
                payload in vec(any::<u8>(), 0..64),
            ) {
                let mut bytes = garbage.clone();
                bytes.extend(encode_frame(code, &payload).unwrap());

                let mut decoder = FrameDecoder::new();
                let frames = decoder.feed(&bytes);

                prop_assert_eq!(frames.len(), 1);
                prop_assert_eq!(frames[0].code, code);
                prop_assert_eq!(frames[0].payload.as_ref(), payload.as_slice());
                prop_assert_eq!(decoder.skipped_total(), garbage.len() as u64);
            }
        }
    }
}
