//! Core types shared by the protocol engine and its callers.

use std::fmt;
use std::str::FromStr;

/// Channel bandwidth of the radio module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bandwidth {
    /// 25 kHz channel spacing.
    #[default]
    Wide,
    /// 12.5 kHz channel spacing.
    Narrow,
}

impl Bandwidth {
    /// `GROUP` payload byte (1 = 25 kHz, 0 = 12.5 kHz).
    pub fn wire_byte(&self) -> u8 {
        match self {
            Bandwidth::Wide => 0x01,
            Bandwidth::Narrow => 0x00,
        }
    }

    /// Scan step for this channel spacing, in hertz.
    pub fn step_hz(&self) -> u64 {
        match self {
            Bandwidth::Wide => 25_000,
            Bandwidth::Narrow => 12_500,
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bandwidth::Wide => write!(f, "25 kHz"),
            Bandwidth::Narrow => write!(f, "12.5 kHz"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Bandwidth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBandwidthError(String);

impl fmt::Display for ParseBandwidthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown bandwidth: {} (expected wide or narrow)", self.0)
    }
}

impl std::error::Error for ParseBandwidthError {}

impl FromStr for Bandwidth {
    type Err = ParseBandwidthError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wide" | "25k" => Ok(Bandwidth::Wide),
            "narrow" | "12.5k" | "12k5" => Ok(Bandwidth::Narrow),
            _ => Err(ParseBandwidthError(s.to_string())),
        }
    }
}

/// Audio filter selection sent with the `FILTERS` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Filters {
    /// Pre-emphasis / de-emphasis.
    pub pre_emphasis: bool,
    /// High-pass filter.
    pub high_pass: bool,
    /// Low-pass filter.
    pub low_pass: bool,
}

impl Filters {
    pub const PRE_EMPHASIS: u8 = 0x01;
    pub const HIGH_PASS: u8 = 0x02;
    pub const LOW_PASS: u8 = 0x04;

    /// All filters disabled.
    pub const fn none() -> Self {
        Filters {
            pre_emphasis: false,
            high_pass: false,
            low_pass: false,
        }
    }

    /// Wire bitmask: bit0 pre-emphasis, bit1 high-pass, bit2 low-pass.
    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.pre_emphasis {
            bits |= Self::PRE_EMPHASIS;
        }
        if self.high_pass {
            bits |= Self::HIGH_PASS;
        }
        if self.low_pass {
            bits |= Self::LOW_PASS;
        }
        bits
    }
}

/// The bundled tuning configuration carried by one `GROUP` command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupConfig {
    pub bandwidth: Bandwidth,
    /// Transmit frequency in MHz.
    pub tx_mhz: f32,
    /// Receive frequency in MHz.
    pub rx_mhz: f32,
    /// CTCSS/DCS code on transmit (0 = none).
    pub tx_tone: u8,
    /// Squelch level, 0–255.
    pub squelch: u8,
    /// CTCSS/DCS code on receive (0 = none).
    pub rx_tone: u8,
}

impl GroupConfig {
    /// Simplex configuration without sub-tones.
    pub fn simplex(bandwidth: Bandwidth, mhz: f64, squelch: u8) -> Self {
        GroupConfig {
            bandwidth,
            tx_mhz: mhz as f32,
            rx_mhz: mhz as f32,
            tx_tone: 0,
            squelch,
            rx_tone: 0,
        }
    }
}

/// Firmware identification reported in the `VERSION` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceVersion {
    /// Firmware version; zero until the dongle has reported.
    pub version: u16,
    /// Radio module status byte (printable ASCII on current firmware).
    pub radio_status: u8,
    /// Hardware revision.
    pub hardware_version: u8,
    /// Receive window size advertised by the dongle, in bytes.
    pub window_size: u32,
}

/// Outcome of polling one scan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanResult {
    /// Not enough S-meter reports yet to decide.
    Waiting,
    /// Reports arrived and none exceeded the threshold.
    NotFound,
    /// A report exceeded the threshold.
    Found,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_wire_bytes() {
        assert_eq!(Bandwidth::Wide.wire_byte(), 0x01);
        assert_eq!(Bandwidth::Narrow.wire_byte(), 0x00);
    }

    #[test]
    fn bandwidth_steps() {
        assert_eq!(Bandwidth::Wide.step_hz(), 25_000);
        assert_eq!(Bandwidth::Narrow.step_hz(), 12_500);
    }

    #[test]
    fn bandwidth_parse() {
        assert_eq!("wide".parse::<Bandwidth>().unwrap(), Bandwidth::Wide);
        assert_eq!("Narrow".parse::<Bandwidth>().unwrap(), Bandwidth::Narrow);
        assert!("medium".parse::<Bandwidth>().is_err());
    }

    #[test]
    fn filters_bits() {
        assert_eq!(Filters::none().bits(), 0x00);
        let all = Filters {
            pre_emphasis: true,
            high_pass: true,
            low_pass: true,
        };
        assert_eq!(all.bits(), 0x07);
        let hl = Filters {
            pre_emphasis: false,
            high_pass: true,
            low_pass: true,
        };
        assert_eq!(hl.bits(), 0x06);
    }

    #[test]
    fn group_simplex() {
        let g = GroupConfig::simplex(Bandwidth::Narrow, 446.00625, 40);
        assert_eq!(g.tx_mhz, g.rx_mhz);
        assert_eq!(g.tx_tone, 0);
        assert_eq!(g.rx_tone, 0);
        assert_eq!(g.squelch, 40);
    }

    #[test]
    fn device_version_default_is_unreported() {
        assert_eq!(DeviceVersion::default().version, 0);
    }
}
