//! Audio types: the decoder seam and the playback ring buffer.
//!
//! RX audio arrives from the dongle as compressed frames. A stateful
//! [`AudioDecoder`] turns each frame into mono 16-bit PCM at 48 kHz, and the
//! samples are queued in an [`AudioRingBuffer`] that a pull-based playback
//! sink (a cpal output callback, a file writer, a test) drains front to back.
//!
//! The ring buffer is guarded by a `std::sync::Mutex` rather than a tokio
//! one because its consumer is typically a real-time audio thread that
//! cannot `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;

/// RX audio sample rate in hertz.
pub const SAMPLE_RATE: u32 = 48_000;

/// RX audio channel count.
pub const CHANNELS: u16 = 1;

/// Maximum samples produced by one decode call (40 ms at 48 kHz).
pub const MAX_FRAME_SAMPLES: usize = 1920;

/// Upper bound on buffered audio (10 s). Older samples are dropped first.
pub const MAX_BUFFERED_SAMPLES: usize = SAMPLE_RATE as usize * 10;

/// Stateful decoder for compressed RX audio frames.
pub trait AudioDecoder: Send {
    /// Decode one compressed frame into `out`, returning the number of
    /// samples written.
    ///
    /// `out` holds [`MAX_FRAME_SAMPLES`] samples. Errors are reported as
    /// [`Error::Codec`](crate::error::Error::Codec).
    fn decode(&mut self, frame: &[u8], out: &mut [i16]) -> Result<usize>;
}

#[derive(Debug)]
struct RingState {
    samples: VecDeque<i16>,
    gain: f32,
    dropped: u64,
    /// Set while consecutive pushes keep overflowing.
    overflowing: bool,
}

/// Shared FIFO of PCM samples between the dispatcher and the playback sink.
///
/// Cloning yields another handle to the same buffer.
#[derive(Debug, Clone)]
pub struct AudioRingBuffer {
    inner: Arc<Mutex<RingState>>,
}

impl AudioRingBuffer {
    /// Create an empty buffer at full volume.
    pub fn new() -> Self {
        AudioRingBuffer {
            inner: Arc::new(Mutex::new(RingState {
                samples: VecDeque::new(),
                gain: 1.0,
                dropped: 0,
                overflowing: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        // A panic on the audio thread must not take RX audio down with it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append decoded samples in arrival order.
    pub fn push(&self, samples: &[i16]) {
        let mut state = self.lock();
        state.samples.extend(samples.iter().copied());
        let excess = state.samples.len().saturating_sub(MAX_BUFFERED_SAMPLES);
        if excess == 0 {
            state.overflowing = false;
            return;
        }
        state.samples.drain(..excess);
        state.dropped += excess as u64;
        // Warn once per overflow run; a paused sink overflows on every push.
        if state.overflowing {
            tracing::debug!(dropped = excess, total = state.dropped, "audio buffer still full");
        } else {
            state.overflowing = true;
            tracing::warn!(
                dropped = excess,
                "audio buffer overflow, dropping oldest samples"
            );
        }
    }

    /// Fill `out` from the front of the buffer.
    ///
    /// Returns how many buffered samples were consumed; the rest of `out` is
    /// zero-filled. When playback is paused (gain 0) nothing is consumed and
    /// `out` is all silence. Samples not requested stay queued.
    pub fn pull(&self, out: &mut [i16]) -> usize {
        let mut state = self.lock();
        if state.gain <= 0.0 {
            out.fill(0);
            return 0;
        }
        let n = out.len().min(state.samples.len());
        let gain = state.gain;
        for (dst, src) in out.iter_mut().zip(state.samples.drain(..n)) {
            *dst = apply_gain(src, gain);
        }
        out[n..].fill(0);
        n
    }

    /// Fill a little-endian byte buffer (two bytes per sample).
    ///
    /// Convenience for sinks that consume raw `S16LE` bytes. A trailing odd
    /// byte is zeroed.
    pub fn pull_le_bytes(&self, out: &mut [u8]) -> usize {
        let mut samples = vec![0i16; out.len() / 2];
        let n = self.pull(&mut samples);
        for (chunk, s) in out.chunks_exact_mut(2).zip(samples.iter()) {
            chunk.copy_from_slice(&s.to_le_bytes());
        }
        if out.len() % 2 == 1 {
            if let Some(last) = out.last_mut() {
                *last = 0;
            }
        }
        n
    }

    /// Number of samples waiting for playback.
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// Returns `true` if no samples are waiting.
    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    /// Discard all queued samples.
    pub fn clear(&self) {
        self.lock().samples.clear();
    }

    /// Set the playback gain, clamped to `[0.0, 1.0]`. Zero pauses playback.
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.lock().gain = gain;
    }

    /// Current playback gain.
    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    /// Returns `true` unless playback is paused.
    pub fn is_playing(&self) -> bool {
        self.lock().gain > 0.0
    }

    /// Total samples discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_gain(sample: i16, gain: f32) -> i16 {
    if gain >= 1.0 {
        sample
    } else {
        (f32::from(sample) * gain) as i16
    }
}
