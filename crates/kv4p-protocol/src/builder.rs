//! SessionBuilder -- fluent builder for constructing [`DeviceSession`] instances.
//!
//! Separates configuration from construction so that callers can set up the
//! serial port, handshake timing, scan parameters, the audio decoder and
//! callbacks before the IO task is spawned.
//!
//! # Example
//!
//! ```no_run
//! use kv4p_protocol::builder::SessionBuilder;
//! use kv4p_protocol::session::RadioConfig;
//!
//! # async fn example() -> kv4p_core::Result<()> {
//! let session = SessionBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .on_smeter(|s| println!("S{s}"))
//!     .build()
//!     .await?;
//! session.bring_up(&RadioConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};

use kv4p_core::error::{Error, Result};
use kv4p_core::transport::Transport;
use kv4p_core::{AudioDecoder, AudioRingBuffer};
use kv4p_transport::DEFAULT_BAUD_RATE;

use crate::audio::AudioPipeline;
use crate::dispatch::{Callbacks, Dispatcher};
use crate::io::{IoConfig, spawn_io_task};
use crate::session::{DeviceSession, SessionTiming};
use crate::state::SessionState;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`DeviceSession`].
///
/// Every setting has a default matching the dongle's firmware, so the
/// simplest usage is:
///
/// ```ignore
/// let session = SessionBuilder::new().build().await?;
/// ```
pub struct SessionBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    debug: bool,
    read_timeout: Duration,
    credit_cooldown: Duration,
    timing: SessionTiming,
    audio_decoder: Option<Box<dyn AudioDecoder>>,
    callbacks: Callbacks,
}

impl SessionBuilder {
    pub fn new() -> Self {
        SessionBuilder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            debug: false,
            read_timeout: Duration::from_millis(100),
            credit_cooldown: Duration::from_secs(1),
            timing: SessionTiming {
                hello_attempts: 10,
                version_attempts: 10,
                poll_interval: Duration::from_secs(1),
                settle_delay: Duration::from_secs(1),
                reset_pulse: Duration::from_millis(100),
                reset_pause: Duration::from_secs(1),
                scan_poll_interval: Duration::from_millis(100),
                scan_max_polls: 20,
                scan_min_samples: 3,
                scan_threshold: 3,
            },
            audio_decoder: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    ///
    /// Without one, [`build()`](Self::build) looks for a known USB bridge.
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Log per-frame audio diagnostics.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// HELLO polls per pass (default: 10).
    pub fn hello_attempts(mut self, n: u32) -> Self {
        self.timing.hello_attempts = n;
        self
    }

    /// VERSION polls (default: 10).
    pub fn version_attempts(mut self, n: u32) -> Self {
        self.timing.version_attempts = n;
        self
    }

    /// Interval between HELLO and VERSION polls (default: 1s).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.timing.poll_interval = interval;
        self
    }

    /// Pause after STOP (default: 1s).
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.timing.settle_delay = delay;
        self
    }

    /// Length of each phase of the DTR/RTS reset pulse (default: 100ms).
    pub fn reset_pulse(mut self, pulse: Duration) -> Self {
        self.timing.reset_pulse = pulse;
        self
    }

    /// Boot time allowed after a reset (default: 1s).
    pub fn reset_pause(mut self, pause: Duration) -> Self {
        self.timing.reset_pause = pause;
        self
    }

    /// How long a frame may wait for window credit before it is sent
    /// anyway (default: 1s).
    pub fn credit_cooldown(mut self, cooldown: Duration) -> Self {
        self.credit_cooldown = cooldown;
        self
    }

    /// Timeout for each transport read (default: 100ms).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Interval between scan-result polls (default: 100ms).
    pub fn scan_poll_interval(mut self, interval: Duration) -> Self {
        self.timing.scan_poll_interval = interval;
        self
    }

    /// Polls per scan step before the dongle is declared unresponsive
    /// (default: 20).
    pub fn scan_max_polls(mut self, n: u32) -> Self {
        self.timing.scan_max_polls = n;
        self
    }

    /// S-meter reports needed to rule a scan step out (default: 3).
    pub fn scan_min_samples(mut self, n: u64) -> Self {
        self.timing.scan_min_samples = n;
        self
    }

    /// A scan step is a hit when a report exceeds this S-unit (default: 3).
    pub fn scan_threshold(mut self, s_units: u8) -> Self {
        self.timing.scan_threshold = s_units;
        self
    }

    /// Decoder for RX audio. Without one, RX audio frames are dropped
    /// (unless the `opus` feature supplies a default).
    pub fn audio_decoder(mut self, decoder: Box<dyn AudioDecoder>) -> Self {
        self.audio_decoder = Some(decoder);
        self
    }

    /// Called with every S-meter reading, on the IO task.
    pub fn on_smeter(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.callbacks.on_smeter = Some(Arc::new(f));
        self
    }

    /// Called with every decoded block of RX audio, on the IO task.
    pub fn on_audio(mut self, f: impl Fn(&[i16]) + Send + Sync + 'static) -> Self {
        self.callbacks.on_audio = Some(Arc::new(f));
        self
    }

    /// Called when the dongle's PTT button is pressed or released.
    pub fn on_ptt(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.callbacks.on_ptt = Some(Arc::new(f));
        self
    }

    #[cfg(feature = "opus")]
    fn default_decoder() -> Result<Option<Box<dyn AudioDecoder>>> {
        Ok(Some(Box::new(crate::opus::OpusDecoder::new()?)))
    }

    #[cfg(not(feature = "opus"))]
    fn default_decoder() -> Result<Option<Box<dyn AudioDecoder>>> {
        Ok(None)
    }

    /// Build a [`DeviceSession`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `kv4p-test-harness`).
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<DeviceSession> {
        if self.credit_cooldown.is_zero() {
            return Err(Error::InvalidParameter(
                "credit_cooldown must be greater than zero".into(),
            ));
        }

        let decoder = match self.audio_decoder {
            Some(decoder) => Some(decoder),
            None => Self::default_decoder()?,
        };
        if decoder.is_none() {
            tracing::debug!("No audio decoder configured, RX audio will be dropped");
        }

        let state = Arc::new(Mutex::new(SessionState::default()));
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let ring = AudioRingBuffer::new();

        let dispatcher = Dispatcher::new(
            state.clone(),
            event_tx.clone(),
            self.callbacks,
            AudioPipeline::new(decoder, ring.clone(), self.debug),
        );
        let io_config = IoConfig {
            read_timeout: self.read_timeout,
            credit_cooldown: self.credit_cooldown,
        };
        let io = spawn_io_task(transport, io_config, dispatcher, state.clone(), event_tx.clone());

        Ok(DeviceSession::new(io, state, event_tx, ring, self.timing))
    }

    /// Build a [`DeviceSession`] over a serial port.
    ///
    /// Uses the port set with [`serial_port()`](Self::serial_port), or the
    /// first attached dongle found by USB vendor/product ID.
    pub async fn build(mut self) -> Result<DeviceSession> {
        let port = match self.serial_port.take() {
            Some(port) => port,
            None => kv4p_transport::find_dongle_port()?
                .map(|p| p.port_name)
                .ok_or_else(|| Error::Transport("no KV4P dongle found".into()))?,
        };

        tracing::info!(port = %port, baud = self.baud_rate, "Opening dongle");
        let transport = kv4p_transport::SerialTransport::open(&port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::ByteDecoder;
    use crate::commands::*;
    use kv4p_core::RadioEvent;
    use kv4p_test_harness::MockTransport;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn builder_defaults() {
        let mock = MockTransport::new();
        let session = SessionBuilder::new()
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        let state = session.state().await;
        assert_eq!(state.window.credit(), 1024);
        assert_eq!(state.volume, 1.0);
        assert!(session.is_connected());
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn builder_rejects_zero_cooldown() {
        let result = SessionBuilder::new()
            .credit_cooldown(Duration::ZERO)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn builder_bad_serial_port() {
        let result = SessionBuilder::new()
            .serial_port("/nonexistent/kv4p-tty")
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builder_fluent_chain() {
        let mock = MockTransport::new();
        let session = SessionBuilder::new()
            .serial_port("/dev/ttyUSB0")
            .baud_rate(115_200)
            .debug(true)
            .hello_attempts(1)
            .version_attempts(1)
            .poll_interval(Duration::from_millis(1))
            .settle_delay(Duration::from_millis(1))
            .reset_pulse(Duration::from_millis(1))
            .reset_pause(Duration::from_millis(1))
            .credit_cooldown(Duration::from_millis(50))
            .read_timeout(Duration::from_millis(5))
            .scan_poll_interval(Duration::from_millis(1))
            .scan_max_polls(2)
            .scan_min_samples(1)
            .scan_threshold(5)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        assert!(!session.wait_for_hello().await.unwrap());
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn callbacks_fire_from_io_task() {
        let mock = MockTransport::new();
        let last_s = Arc::new(AtomicU8::new(0));
        let ptt_presses = Arc::new(AtomicUsize::new(0));
        let audio_samples = Arc::new(AtomicUsize::new(0));

        let session = {
            let last_s = last_s.clone();
            let ptt_presses = ptt_presses.clone();
            let audio_samples = audio_samples.clone();
            SessionBuilder::new()
                .audio_decoder(Box::new(ByteDecoder))
                .on_smeter(move |s| last_s.store(s, Ordering::SeqCst))
                .on_ptt(move |down| {
                    if down {
                        ptt_presses.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .on_audio(move |pcm| {
                    audio_samples.fetch_add(pcm.len(), Ordering::SeqCst);
                })
                .build_with_transport(Box::new(mock.handle()))
                .await
                .unwrap()
        };

        mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_SMETER_REPORT, 0x01, 0x00, 0xFF]);
        mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_PHYS_PTT_DOWN, 0x00, 0x00]);
        mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_RX_AUDIO, 0x03, 0x00, 1, 2, 3]);

        wait_until(|| audio_samples.load(Ordering::SeqCst) == 3).await;
        assert_eq!(last_s.load(Ordering::SeqCst), 9);
        assert_eq!(ptt_presses.load(Ordering::SeqCst), 1);
        assert_eq!(session.audio().len(), 3);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let mock = MockTransport::new();
        let session = SessionBuilder::new()
            .build_with_transport(Box::new(mock.handle()))
            .await
            .unwrap();
        let mut events = session.subscribe();

        mock.inject(&[0xDE, 0xAD, 0xBE, 0xEF, RESP_PHYS_PTT_UP, 0x00, 0x00]);
        loop {
            match events.recv().await.unwrap() {
                RadioEvent::PhysicalPtt { down } => {
                    assert!(!down);
                    break;
                }
                _ => continue,
            }
        }
        session.shutdown().await.unwrap();
    }
}
