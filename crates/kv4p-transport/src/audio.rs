//! cpal-based RX audio playback.
//!
//! [`AudioPlayback`] opens an output device through [`cpal`] and drains an
//! [`AudioRingBuffer`] from the device's real-time callback. The ring buffer
//! already zero-fills on underrun and honours the session volume, so the
//! callback only has to convert sample format, duplicate the mono signal
//! across the device's channels, and bridge the sample rate if the device
//! does not run at 48 kHz.
//!
//! # Feature flag
//!
//! This module is only compiled when the `audio` feature is enabled:
//!
//! ```toml
//! [dependencies]
//! kv4p-transport = { version = "0.1", features = ["audio"] }
//! ```

use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use kv4p_core::error::{Error, Result};
use kv4p_core::{AudioRingBuffer, SAMPLE_RATE};

/// Convert a 16-bit signed sample to f32 in `[-1.0, 1.0]`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Name and default configuration of an output device.
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// List the output devices of the default audio host, sorted by name.
pub fn list_output_devices() -> Result<Vec<OutputDeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Transport(format!("failed to enumerate output devices: {e}")))?;

    let mut out = Vec::new();
    for device in devices {
        let Ok(desc) = device.description() else {
            continue;
        };
        let Ok(config) = device.default_output_config() else {
            continue;
        };
        out.push(OutputDeviceInfo {
            name: desc.name().to_string(),
            sample_rate: config.sample_rate(),
            channels: config.channels(),
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| Error::Transport("no default audio output device".into()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| Error::Transport(format!("failed to enumerate output devices: {e}")))?;
    for device in devices {
        if let Ok(desc) = device.description() {
            if desc.name() == name {
                return Ok(device);
            }
        }
    }
    Err(Error::Transport(format!("audio device not found: {name}")))
}

/// Pulls 48 kHz mono samples from the ring and spreads them over an
/// interleaved device buffer at the device's rate.
struct Resampler {
    ring: AudioRingBuffer,
    channels: usize,
    /// Source samples consumed per output frame.
    step: f64,
    /// Fractional read position carried between callbacks.
    phase: f64,
    scratch: Vec<i16>,
}

impl Resampler {
    fn new(ring: AudioRingBuffer, device_rate: u32, channels: u16) -> Self {
        Resampler {
            ring,
            channels: usize::from(channels.max(1)),
            step: f64::from(SAMPLE_RATE) / f64::from(device_rate.max(1)),
            phase: 0.0,
            scratch: Vec::new(),
        }
    }

    /// Fill `out` with interleaved frames, converting each sample with `conv`.
    fn fill<T: Copy>(&mut self, out: &mut [T], conv: impl Fn(i16) -> T) {
        let frames = out.len() / self.channels;
        let end = self.phase + frames as f64 * self.step;
        let needed = end.floor() as usize;

        self.scratch.resize(needed.max(1), 0);
        self.ring.pull(&mut self.scratch[..needed]);

        for (i, frame) in out.chunks_mut(self.channels).enumerate() {
            let idx = (self.phase + i as f64 * self.step).floor() as usize;
            let sample = if needed == 0 {
                0
            } else {
                self.scratch[idx.min(needed - 1)]
            };
            frame.fill(conv(sample));
        }
        self.phase = end - needed as f64;
    }
}

/// Plays an [`AudioRingBuffer`] on a cpal output device.
///
/// The cpal stream is held inside this struct. Dropping it, or calling
/// [`stop()`](AudioPlayback::stop), releases the device.
///
/// ```no_run
/// use kv4p_core::AudioRingBuffer;
/// use kv4p_transport::audio::AudioPlayback;
///
/// # fn example() -> kv4p_core::Result<()> {
/// let ring = AudioRingBuffer::new();
/// let mut playback = AudioPlayback::new(None);
/// playback.start(ring.clone())?;
/// # Ok(())
/// # }
/// ```
pub struct AudioPlayback {
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

impl AudioPlayback {
    /// Target the named output device, or the host default when `None`.
    pub fn new(device_name: Option<&str>) -> Self {
        AudioPlayback {
            device_name: device_name.map(str::to_string),
            stream: None,
        }
    }

    /// Open the device and start draining `ring`.
    pub fn start(&mut self, ring: AudioRingBuffer) -> Result<()> {
        let device = find_output_device(self.device_name.as_deref())?;
        let supported = device
            .default_output_config()
            .map_err(|e| Error::Transport(format!("no default output config: {e}")))?;

        let sample_format = supported.sample_format();
        let device_rate = supported.sample_rate();
        let channels = supported.channels();
        let config: cpal::StreamConfig = supported.into();

        if device_rate != SAMPLE_RATE {
            tracing::info!(
                device_rate,
                "Output device does not run at 48 kHz, resampling"
            );
        }

        let mut resampler = Resampler::new(ring, device_rate, channels);
        let on_error = |err: cpal::StreamError| tracing::error!("cpal output stream error: {}", err);

        let stream = match sample_format {
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _info: &cpal::OutputCallbackInfo| {
                    resampler.fill(data, |s| s);
                },
                on_error,
                None,
            ),
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    resampler.fill(data, i16_to_f32);
                },
                on_error,
                None,
            ),
            other => {
                return Err(Error::Transport(format!(
                    "unsupported output sample format: {other}"
                )));
            }
        }
        .map_err(|e| Error::Transport(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Transport(format!("failed to start output stream: {e}")))?;

        tracing::info!(
            device = self.device_name.as_deref().unwrap_or("default"),
            channels,
            "Audio playback started"
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Returns `true` while a stream is open.
    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    /// Stop playback and release the device.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Audio playback stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_to_f32_range() {
        assert_eq!(i16_to_f32(0), 0.0);
        assert_eq!(i16_to_f32(i16::MAX), 1.0);
        let min = i16_to_f32(i16::MIN);
        assert!(min < -1.0 && min > -1.001);
    }

    #[test]
    fn same_rate_mono_passthrough() {
        let ring = AudioRingBuffer::new();
        ring.push(&[1, 2, 3, 4]);
        let mut r = Resampler::new(ring.clone(), SAMPLE_RATE, 1);

        let mut out = [0i16; 4];
        r.fill(&mut out, |s| s);
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn mono_duplicated_to_stereo() {
        let ring = AudioRingBuffer::new();
        ring.push(&[10, 20]);
        let mut r = Resampler::new(ring, SAMPLE_RATE, 2);

        let mut out = [0i16; 4];
        r.fill(&mut out, |s| s);
        assert_eq!(out, [10, 10, 20, 20]);
    }

    #[test]
    fn downsample_consumes_more_than_it_writes() {
        let ring = AudioRingBuffer::new();
        ring.push(&[1, 2, 3, 4, 5, 6]);
        // 24 kHz device: two source samples per output frame.
        let mut r = Resampler::new(ring.clone(), 24_000, 1);

        let mut out = [0i16; 3];
        r.fill(&mut out, |s| s);
        assert_eq!(out, [1, 3, 5]);
        assert!(ring.is_empty());
    }

    #[test]
    fn underrun_is_silence() {
        let ring = AudioRingBuffer::new();
        let mut r = Resampler::new(ring, SAMPLE_RATE, 1);
        let mut out = [5.0f32; 3];
        r.fill(&mut out, i16_to_f32);
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn playback_starts_stopped() {
        let mut playback = AudioPlayback::new(Some("nonexistent"));
        assert!(!playback.is_running());
        playback.stop();
        assert!(!playback.is_running());
    }

    #[test]
    #[ignore] // requires audio hardware
    fn list_devices() {
        let devices = list_output_devices().unwrap();
        for d in &devices {
            println!("{} ({} Hz, {} ch)", d.name, d.sample_rate, d.channels);
        }
    }
}
