//! DeviceSession -- handshake, configuration and scan sequences.
//!
//! A session is created by [`SessionBuilder`](crate::builder::SessionBuilder),
//! which spawns the IO task. Every command method queues one frame on that
//! task and returns once the frame has been written; waits between steps are
//! cancellable sleeps that fail with [`Error::NotConnected`] once the
//! session shuts down.
//!
//! # Bring-up
//!
//! [`DeviceSession::bring_up`] runs the whole sequence: optional reset,
//! HELLO wait, STOP, CONFIG, VERSION wait, FILTERS, volume and GROUP. A
//! dongle that never says hello or never reports its version yields
//! `Ok(false)` rather than an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use kv4p_core::error::{Error, Result};
use kv4p_core::events::RadioEvent;
use kv4p_core::transport::ControlLine;
use kv4p_core::{
    AudioRingBuffer, Band, Bandwidth, DeviceVersion, Filters, GroupConfig, ScanResult,
    clamp_frequency, format_freq_mhz,
};

use crate::commands;
use crate::frame::Frame;
use crate::io::SessionIo;
use crate::state::SessionState;

/// Squelch applied while scanning, fully open.
pub const SCAN_SQUELCH: u8 = 0;

/// Timing and retry parameters for the session's sequences.
#[derive(Debug, Clone)]
pub(crate) struct SessionTiming {
    pub hello_attempts: u32,
    pub version_attempts: u32,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub reset_pulse: Duration,
    pub reset_pause: Duration,
    pub scan_poll_interval: Duration,
    pub scan_max_polls: u32,
    pub scan_min_samples: u64,
    pub scan_threshold: u8,
}

/// Radio settings applied by [`DeviceSession::bring_up`].
#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    /// Module to use. `None` picks the band from the frequency.
    pub band: Option<Band>,
    pub bandwidth: Bandwidth,
    /// Simplex frequency in MHz.
    pub frequency_mhz: f64,
    /// Squelch, 0–255.
    pub squelch: u8,
    pub filters: Filters,
    /// Playback volume, 0.0–1.0.
    pub volume: f32,
    /// Pulse the reset lines before waiting for HELLO.
    pub reset: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            band: None,
            bandwidth: Bandwidth::Wide,
            // NOAA weather radio.
            frequency_mhz: 162.4,
            squelch: 0,
            filters: Filters {
                pre_emphasis: false,
                high_pass: true,
                low_pass: true,
            },
            volume: 1.0,
            reset: false,
        }
    }
}

impl RadioConfig {
    /// Band and clamped frequency to tune.
    ///
    /// With an explicit band the frequency is clamped into that band;
    /// otherwise it is clamped to the nearest hardware limit and the band
    /// follows from it.
    pub fn resolve(&self) -> (Band, f64) {
        match self.band {
            Some(band) => (band, band.clamp(self.frequency_mhz)),
            None => {
                let mhz = clamp_frequency(self.frequency_mhz);
                (Band::for_frequency(mhz), mhz)
            }
        }
    }
}

/// A connected KV4P dongle.
///
/// Constructed via [`SessionBuilder`](crate::builder::SessionBuilder).
pub struct DeviceSession {
    io: SessionIo,
    state: Arc<Mutex<SessionState>>,
    event_tx: broadcast::Sender<RadioEvent>,
    ring: AudioRingBuffer,
    timing: SessionTiming,
}

impl DeviceSession {
    pub(crate) fn new(
        io: SessionIo,
        state: Arc<Mutex<SessionState>>,
        event_tx: broadcast::Sender<RadioEvent>,
        ring: AudioRingBuffer,
        timing: SessionTiming,
    ) -> Self {
        DeviceSession {
            io,
            state,
            event_tx,
            ring,
            timing,
        }
    }

    /// Sleep for `duration` unless the session shuts down first.
    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.io.cancel_token().cancelled() => Err(Error::NotConnected),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn send(&self, frame: Frame) -> Result<()> {
        debug!(
            code = %format!("0x{:02X}", frame.code),
            len = frame.payload.len(),
            "Sending command"
        );
        self.io.send(frame).await
    }

    async fn set_lines(&self, dtr: bool, rts: bool) -> Result<()> {
        self.io.set_line(ControlLine::Dtr, dtr).await?;
        self.io.set_line(ControlLine::Rts, rts).await
    }

    // ---------------------------------------------------------------
    // Handshake
    // ---------------------------------------------------------------

    /// Reboot the dongle with the DTR/RTS pulse, then wait for it to boot.
    ///
    /// Clears the HELLO flag so a fresh HELLO can be awaited.
    pub async fn reset(&self) -> Result<()> {
        info!("Resetting dongle");
        self.state.lock().await.hello_received = false;

        self.set_lines(false, true).await?;
        self.pause(self.timing.reset_pulse).await?;
        self.set_lines(true, false).await?;
        self.pause(self.timing.reset_pulse).await?;
        self.set_lines(false, true).await?;
        self.pause(self.timing.reset_pause).await
    }

    /// Wait for HELLO, resetting once if the first pass times out.
    ///
    /// Returns `Ok(false)` if no HELLO arrives in either pass.
    pub async fn wait_for_hello(&self) -> Result<bool> {
        for pass in 0..2 {
            if pass > 0 {
                warn!("No HELLO from dongle, resetting");
                self.reset().await?;
            }
            for attempt in 0..self.timing.hello_attempts {
                if self.is_hello().await {
                    return Ok(true);
                }
                debug!(attempt, "Waiting for HELLO");
                self.pause(self.timing.poll_interval).await?;
            }
        }
        Ok(self.is_hello().await)
    }

    /// Stop any running radio activity and let the dongle settle.
    pub async fn send_stop(&self) -> Result<()> {
        self.send(commands::cmd_stop()).await?;
        self.pause(self.timing.settle_delay).await
    }

    /// Select the radio module.
    pub async fn send_config(&self, band: Band) -> Result<()> {
        self.send(commands::cmd_config(band)).await?;
        self.state.lock().await.band = band;
        Ok(())
    }

    /// Wait for the dongle's VERSION report.
    ///
    /// Returns `None` if the version is still unknown after all attempts.
    pub async fn wait_for_version(&self) -> Result<Option<DeviceVersion>> {
        for attempt in 0..self.timing.version_attempts {
            if let Some(version) = self.version().await {
                return Ok(Some(version));
            }
            debug!(attempt, "Waiting for VERSION");
            self.pause(self.timing.poll_interval).await?;
        }
        Ok(self.version().await)
    }

    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------

    pub async fn send_filters(&self, filters: Filters) -> Result<()> {
        self.send(commands::cmd_filters(filters)).await?;
        self.state.lock().await.filters = filters;
        Ok(())
    }

    /// Set the playback volume, 0.0–1.0. Zero pauses playback.
    ///
    /// Volume is applied locally; no frame is sent.
    pub async fn set_volume(&self, volume: f32) {
        self.ring.set_gain(volume);
        let gain = self.ring.gain();
        self.state.lock().await.volume = gain;
        debug!(volume = gain, "Volume set");
    }

    /// Tune a simplex channel.
    ///
    /// The frequency is clamped into the configured band first; the
    /// clamped value is what goes on the wire and into the state.
    pub async fn send_group(&self, bandwidth: Bandwidth, frequency_mhz: f64, squelch: u8) -> Result<()> {
        let band = self.state.lock().await.band;
        let requested = frequency_mhz;
        let frequency_mhz = band.clamp(requested);
        if !band.contains(requested) {
            debug!(requested, clamped = frequency_mhz, "Frequency clamped to {band}");
        }

        let group = GroupConfig::simplex(bandwidth, frequency_mhz, squelch);
        self.send(commands::cmd_group(&group)).await?;

        let mut state = self.state.lock().await;
        state.bandwidth = bandwidth;
        state.frequency_mhz = frequency_mhz;
        state.squelch = squelch;
        Ok(())
    }

    /// Key or unkey the transmitter.
    pub async fn send_ptt(&self, down: bool) -> Result<()> {
        self.send(commands::cmd_ptt(down)).await
    }

    /// Run the full bring-up sequence.
    ///
    /// Returns `Ok(false)` if the dongle never says hello or never reports
    /// its version.
    pub async fn bring_up(&self, config: &RadioConfig) -> Result<bool> {
        if config.reset {
            self.reset().await?;
        }

        if !self.wait_for_hello().await? {
            warn!("No HELLO received");
            return Ok(false);
        }

        self.send_stop().await?;

        let (band, frequency_mhz) = config.resolve();
        if frequency_mhz != config.frequency_mhz {
            info!(
                requested = config.frequency_mhz,
                clamped = frequency_mhz,
                "Frequency clamped to {band}"
            );
        }
        self.send_config(band).await?;

        let Some(version) = self.wait_for_version().await? else {
            warn!("No VERSION received");
            return Ok(false);
        };
        debug!(version = version.version, "Dongle ready");

        self.send_filters(config.filters).await?;
        self.set_volume(config.volume).await;
        self.send_group(config.bandwidth, frequency_mhz, config.squelch)
            .await?;

        info!(
            band = %band,
            bandwidth = %config.bandwidth,
            frequency = %format_freq_mhz(frequency_mhz),
            squelch = config.squelch,
            "Dongle configured"
        );
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Scan
    // ---------------------------------------------------------------

    /// Sweep from `start_mhz` to the top of the configured band.
    ///
    /// Steps by the channel spacing of the configured bandwidth with filters
    /// off and squelch open. Stops at the first frequency whose S-meter
    /// exceeds the threshold and returns it; returns `None` if the sweep
    /// finds nothing. Either way, filters and squelch are restored and the
    /// final frequency (unchanged when nothing was found) is re-applied.
    pub async fn scan(&self, start_mhz: f64) -> Result<Option<f64>> {
        let (band, bandwidth, frequency_mhz, squelch, filters) = {
            let state = self.state.lock().await;
            (
                state.band,
                state.bandwidth,
                state.frequency_mhz,
                state.squelch,
                state.filters,
            )
        };

        info!(
            band = %band,
            start = %format_freq_mhz(band.clamp(start_mhz)),
            step_hz = bandwidth.step_hz(),
            "Scanning"
        );

        let swept = self.sweep(band, bandwidth, start_mhz).await;
        let final_mhz = match &swept {
            Ok(Some(found)) => *found,
            _ => frequency_mhz,
        };

        let restored = self.restore_after_scan(bandwidth, final_mhz, squelch, filters).await;
        let found = swept?;
        restored?;

        match found {
            Some(mhz) => info!(frequency = %format_freq_mhz(mhz), "Scan found signal"),
            None => info!("Scan done, nothing found"),
        }
        Ok(found)
    }

    async fn sweep(&self, band: Band, bandwidth: Bandwidth, start_mhz: f64) -> Result<Option<f64>> {
        self.send(commands::cmd_filters(Filters::none())).await?;

        // Whole hertz avoid drift from repeated float addition.
        let step_hz = bandwidth.step_hz();
        let end_hz = mhz_to_hz(band.max_mhz());
        let mut hz = mhz_to_hz(band.clamp(start_mhz));

        while hz <= end_hz {
            let mhz = hz as f64 / 1e6;
            self.state.lock().await.begin_scan_step();
            let group = GroupConfig::simplex(bandwidth, mhz, SCAN_SQUELCH);
            self.send(commands::cmd_group(&group)).await?;

            match self.poll_scan_step().await? {
                ScanResult::Found => return Ok(Some(mhz)),
                ScanResult::NotFound => {
                    debug!(frequency = %format_freq_mhz(mhz), "Nothing here");
                }
                ScanResult::Waiting => {
                    return Err(Error::Protocol(format!(
                        "device unresponsive: no S-meter reports at {}",
                        format_freq_mhz(mhz)
                    )));
                }
            }
            hz += step_hz;
        }
        Ok(None)
    }

    /// Poll the current scan step until it resolves or the poll budget runs
    /// out.
    async fn poll_scan_step(&self) -> Result<ScanResult> {
        let mut polls = 0;
        loop {
            let result = {
                let state = self.state.lock().await;
                let result =
                    state.scan_result(self.timing.scan_threshold, self.timing.scan_min_samples);
                tracing::trace!(samples = state.scan_samples(), peak = state.scan_peak, "Scan poll");
                result
            };
            if result != ScanResult::Waiting || polls >= self.timing.scan_max_polls {
                return Ok(result);
            }
            polls += 1;
            self.pause(self.timing.scan_poll_interval).await?;
        }
    }

    async fn restore_after_scan(
        &self,
        bandwidth: Bandwidth,
        frequency_mhz: f64,
        squelch: u8,
        filters: Filters,
    ) -> Result<()> {
        self.send(commands::cmd_filters(filters)).await?;
        self.send_group(bandwidth, frequency_mhz, squelch).await
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Snapshot of the session state.
    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn is_hello(&self) -> bool {
        self.state.lock().await.hello_received
    }

    /// Firmware version, once the dongle has reported it.
    pub async fn version(&self) -> Option<DeviceVersion> {
        let version = self.state.lock().await.version;
        (version.version != 0).then_some(version)
    }

    /// Latest S-unit reading and the number of reports received so far.
    pub async fn s_meter(&self) -> (u8, u64) {
        let state = self.state.lock().await;
        (state.s_meter, state.s_meter_samples)
    }

    /// Subscribe to dongle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.event_tx.subscribe()
    }

    /// RX audio buffer for the playback sink.
    pub fn audio(&self) -> &AudioRingBuffer {
        &self.ring
    }

    /// `true` until the session shuts down or the dongle disconnects.
    pub fn is_connected(&self) -> bool {
        !self.io.is_cancelled()
    }

    /// Send STOP, stop the IO task and close the transport.
    ///
    /// Later commands fail with [`Error::NotConnected`].
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.io.send(commands::cmd_stop()).await {
            debug!(error = %e, "STOP not sent during shutdown");
        }
        let mut transport = self.io.shutdown().await?;
        transport.close().await?;
        info!("Session closed");
        Ok(())
    }
}

fn mhz_to_hz(mhz: f64) -> u64 {
    (mhz * 1e6).round() as u64
}
