//! Opus RX audio decoder (feature `opus`).
//!
//! The dongle's firmware encodes RX audio as 48 kHz mono Opus, one packet
//! per `RX_AUDIO` frame.

use kv4p_core::{AudioDecoder, Error, Result, SAMPLE_RATE};

/// [`AudioDecoder`] backed by libopus.
pub struct OpusDecoder {
    inner: opus::Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self> {
        let inner = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)
            .map_err(|e| Error::Codec(format!("failed to create Opus decoder: {e}")))?;
        Ok(OpusDecoder { inner })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, frame: &[u8], out: &mut [i16]) -> Result<usize> {
        self.inner
            .decode(frame, out, false)
            .map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv4p_core::MAX_FRAME_SAMPLES;

    #[test]
    fn decoder_creates() {
        assert!(OpusDecoder::new().is_ok());
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let mut decoder = OpusDecoder::new().unwrap();
        let mut out = vec![0i16; MAX_FRAME_SAMPLES];
        // Frame code 3 with no frame count byte is malformed.
        let result = decoder.decode(&[0x03], &mut out);
        assert!(matches!(result, Err(Error::Codec(_))));
    }
}
