//! Session state shared between the IO task and the device session.
//!
//! The dispatcher writes what the dongle reports (hello, version, credit,
//! S-meter); the session writes what it has configured (band, frequency,
//! squelch, filters, volume). All access is guarded by an
//! `Arc<tokio::sync::Mutex<SessionState>>`.

use kv4p_core::{Band, Bandwidth, DeviceVersion, Filters, ScanResult};

use crate::window::FlowWindow;

/// Snapshot of everything known about the dongle.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// A `HELLO` frame has arrived since the last reset.
    pub hello_received: bool,
    /// Last `VERSION` report; `version` is zero until one arrives.
    pub version: DeviceVersion,
    /// Host-to-dongle send credit.
    pub window: FlowWindow,
    /// Latest S-unit reading (1–9), zero before the first report.
    pub s_meter: u8,
    /// Number of S-meter reports received.
    pub s_meter_samples: u64,
    pub band: Band,
    pub bandwidth: Bandwidth,
    /// Configured simplex frequency in MHz.
    pub frequency_mhz: f64,
    /// Configured squelch, 0–255.
    pub squelch: u8,
    pub filters: Filters,
    /// Playback gain, 0.0–1.0.
    pub volume: f32,
    /// The IO task is running and the transport has not failed.
    pub connected: bool,
    /// `s_meter_samples` when the current scan step began.
    pub scan_baseline: u64,
    /// Highest S-unit seen since the current scan step began.
    pub scan_peak: u8,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            hello_received: false,
            version: DeviceVersion::default(),
            window: FlowWindow::default(),
            s_meter: 0,
            s_meter_samples: 0,
            band: Band::default(),
            bandwidth: Bandwidth::default(),
            frequency_mhz: 0.0,
            squelch: 0,
            filters: Filters::none(),
            volume: 1.0,
            connected: false,
            scan_baseline: 0,
            scan_peak: 0,
        }
    }
}

impl SessionState {
    /// Record an S-meter report.
    pub fn record_s_meter(&mut self, s_units: u8) {
        self.s_meter = s_units;
        self.s_meter_samples += 1;
        self.scan_peak = self.scan_peak.max(s_units);
    }

    /// Start tracking a new scan step.
    pub fn begin_scan_step(&mut self) {
        self.scan_baseline = self.s_meter_samples;
        self.scan_peak = 0;
    }

    /// S-meter reports received since the current scan step began.
    pub fn scan_samples(&self) -> u64 {
        self.s_meter_samples.saturating_sub(self.scan_baseline)
    }

    /// Classify the current scan step.
    ///
    /// `Found` as soon as any report exceeds `threshold`; `NotFound` once
    /// `min_samples` reports have arrived without one; `Waiting` otherwise.
    pub fn scan_result(&self, threshold: u8, min_samples: u64) -> ScanResult {
        if self.scan_peak > threshold {
            ScanResult::Found
        } else if self.scan_samples() >= min_samples.max(1) {
            ScanResult::NotFound
        } else {
            ScanResult::Waiting
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state() {
        let state = SessionState::default();
        assert!(!state.hello_received);
        assert_eq!(state.version.version, 0);
        assert_eq!(state.window.credit(), 1024);
        assert_eq!(state.volume, 1.0);
        assert!(!state.connected);
    }

    #[test]
    fn s_meter_reports_counted() {
        let mut state = SessionState::default();
        state.record_s_meter(3);
        state.record_s_meter(5);
        assert_eq!(state.s_meter, 5);
        assert_eq!(state.s_meter_samples, 2);
        assert_eq!(state.scan_peak, 5);
    }

    #[test]
    fn scan_waiting_until_enough_samples() {
        let mut state = SessionState::default();
        state.record_s_meter(9);
        state.begin_scan_step();
        assert_eq!(state.scan_result(3, 2), ScanResult::Waiting);

        state.record_s_meter(1);
        assert_eq!(state.scan_result(3, 2), ScanResult::Waiting);
        state.record_s_meter(2);
        assert_eq!(state.scan_result(3, 2), ScanResult::NotFound);
    }

    #[test]
    fn scan_found_on_first_strong_report() {
        let mut state = SessionState::default();
        state.begin_scan_step();
        state.record_s_meter(4);
        assert_eq!(state.scan_result(3, 5), ScanResult::Found);
    }

    #[test]
    fn scan_threshold_is_exclusive() {
        let mut state = SessionState::default();
        state.begin_scan_step();
        state.record_s_meter(3);
        assert_eq!(state.scan_result(3, 1), ScanResult::NotFound);
    }

    #[test]
    fn scan_zero_min_samples_still_needs_a_report() {
        let state = SessionState::default();
        assert_eq!(state.scan_result(3, 0), ScanResult::Waiting);
    }
}
