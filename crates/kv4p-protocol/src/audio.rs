//! RX audio pipeline: compressed frame in, PCM into the ring buffer.

use kv4p_core::{AudioDecoder, AudioRingBuffer, MAX_FRAME_SAMPLES};

/// Fields of an Opus TOC byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusToc {
    /// Mode/bandwidth/frame-size configuration, 0–31.
    pub config: u8,
    pub stereo: bool,
    /// Frame count code, 0–3.
    pub frame_code: u8,
}

impl OpusToc {
    pub fn parse(byte: u8) -> Self {
        OpusToc {
            config: byte >> 3,
            stereo: byte & 0x04 != 0,
            frame_code: byte & 0x03,
        }
    }
}

/// Decodes `RX_AUDIO` payloads and queues the PCM for playback.
///
/// Owned by the dispatcher, so frames are decoded strictly in arrival order
/// on the IO task.
pub struct AudioPipeline {
    decoder: Option<Box<dyn AudioDecoder>>,
    ring: AudioRingBuffer,
    pcm: Vec<i16>,
    debug: bool,
    decoded_frames: u64,
    failed_frames: u64,
}

impl AudioPipeline {
    /// Frames are dropped when `decoder` is `None`.
    pub fn new(decoder: Option<Box<dyn AudioDecoder>>, ring: AudioRingBuffer, debug: bool) -> Self {
        AudioPipeline {
            decoder,
            ring,
            pcm: vec![0; MAX_FRAME_SAMPLES],
            debug,
            decoded_frames: 0,
            failed_frames: 0,
        }
    }

    /// Decode one frame, append it to the ring buffer and return the new
    /// samples. Returns `None` if the frame was dropped.
    pub fn process(&mut self, payload: &[u8]) -> Option<&[i16]> {
        let Some(decoder) = self.decoder.as_mut() else {
            tracing::trace!(bytes = payload.len(), "No audio decoder, dropping RX audio");
            return None;
        };

        if self.debug {
            if let Some(&toc) = payload.first() {
                let toc = OpusToc::parse(toc);
                tracing::debug!(
                    bytes = payload.len(),
                    config = toc.config,
                    stereo = toc.stereo,
                    frame_code = toc.frame_code,
                    "RX audio frame"
                );
            }
        }

        match decoder.decode(payload, &mut self.pcm) {
            Ok(n) => {
                let n = n.min(self.pcm.len());
                self.decoded_frames += 1;
                self.ring.push(&self.pcm[..n]);
                Some(&self.pcm[..n])
            }
            Err(e) => {
                self.failed_frames += 1;
                tracing::warn!(
                    error = %e,
                    bytes = payload.len(),
                    "Failed to decode RX audio: {:02X?}",
                    payload
                );
                None
            }
        }
    }

    pub fn ring(&self) -> &AudioRingBuffer {
        &self.ring
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    /// Frames decoded successfully so far.
    pub fn decoded_frames(&self) -> u64 {
        self.decoded_frames
    }

    /// Frames the decoder rejected so far.
    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }
}
