//! Radio module band identification and frequency limits.
//!
//! The dongle's SA818/DRA818 radio module comes in a VHF and a UHF variant.
//! Each variant only tunes within fixed hardware limits, and the dongle must
//! be told which variant it drives via the `CONFIG` command.
//!
//! # Example
//!
//! ```
//! use kv4p_core::{Band, clamp_frequency};
//!
//! assert_eq!(Band::for_frequency(162.4), Band::Vhf);
//! assert_eq!(Band::Uhf.clamp(500.0), 480.0);
//! assert_eq!(clamp_frequency(300.0), 174.0);
//! ```

use std::fmt;
use std::str::FromStr;

/// VHF module lower tuning limit, in MHz.
pub const VHF_MIN_MHZ: f64 = 134.0;
/// VHF module upper tuning limit, in MHz.
pub const VHF_MAX_MHZ: f64 = 174.0;
/// UHF module lower tuning limit, in MHz.
pub const UHF_MIN_MHZ: f64 = 400.0;
/// UHF module upper tuning limit, in MHz.
///
/// The DRA818U only reaches 470 MHz; the SA818U reaches 480 MHz.
pub const UHF_MAX_MHZ: f64 = 480.0;

/// Radio module band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Band {
    /// 134–174 MHz.
    #[default]
    Vhf,
    /// 400–480 MHz.
    Uhf,
}

impl Band {
    /// Band whose module would be used for `mhz`.
    ///
    /// Anything at or above the UHF lower limit selects UHF.
    pub fn for_frequency(mhz: f64) -> Band {
        if mhz >= UHF_MIN_MHZ {
            Band::Uhf
        } else {
            Band::Vhf
        }
    }

    /// Lower and upper tuning limits in MHz.
    pub fn limits(&self) -> (f64, f64) {
        match self {
            Band::Vhf => (VHF_MIN_MHZ, VHF_MAX_MHZ),
            Band::Uhf => (UHF_MIN_MHZ, UHF_MAX_MHZ),
        }
    }

    /// Upper tuning limit in MHz.
    pub fn max_mhz(&self) -> f64 {
        self.limits().1
    }

    /// Clamp `mhz` into this band's tuning range.
    pub fn clamp(&self, mhz: f64) -> f64 {
        let (lo, hi) = self.limits();
        mhz.clamp(lo, hi)
    }

    /// Returns `true` if `mhz` is inside this band's tuning range.
    pub fn contains(&self, mhz: f64) -> bool {
        let (lo, hi) = self.limits();
        (lo..=hi).contains(&mhz)
    }

    /// `CONFIG` command payload byte selecting this module.
    pub fn mode_byte(&self) -> u8 {
        match self {
            Band::Vhf => 0x04,
            Band::Uhf => 0x05,
        }
    }
}

/// Clamp a frequency to the nearest supported hardware limit.
///
/// Below the VHF range maps to 134 MHz, the gap between the bands maps to
/// 174 MHz, and anything above the UHF range maps to 480 MHz. Frequencies
/// inside either band are returned unchanged.
pub fn clamp_frequency(mhz: f64) -> f64 {
    if mhz < VHF_MIN_MHZ {
        VHF_MIN_MHZ
    } else if mhz > VHF_MAX_MHZ && mhz < UHF_MIN_MHZ {
        VHF_MAX_MHZ
    } else if mhz > UHF_MAX_MHZ {
        UHF_MAX_MHZ
    } else {
        mhz
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Band::Vhf => write!(f, "VHF"),
            Band::Uhf => write!(f, "UHF"),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Band`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBandError(String);

impl fmt::Display for ParseBandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown band: {} (expected vhf or uhf)", self.0)
    }
}

impl std::error::Error for ParseBandError {}

impl FromStr for Band {
    type Err = ParseBandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vhf" => Ok(Band::Vhf),
            "uhf" => Ok(Band::Uhf),
            _ => Err(ParseBandError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_for_frequency() {
        assert_eq!(Band::for_frequency(146.52), Band::Vhf);
        assert_eq!(Band::for_frequency(399.99), Band::Vhf);
        assert_eq!(Band::for_frequency(400.0), Band::Uhf);
        assert_eq!(Band::for_frequency(446.0), Band::Uhf);
    }

    #[test]
    fn band_mode_bytes() {
        assert_eq!(Band::Vhf.mode_byte(), 0x04);
        assert_eq!(Band::Uhf.mode_byte(), 0x05);
    }

    #[test]
    fn band_clamp() {
        assert_eq!(Band::Vhf.clamp(100.0), 134.0);
        assert_eq!(Band::Vhf.clamp(200.0), 174.0);
        assert_eq!(Band::Vhf.clamp(162.55), 162.55);
        assert_eq!(Band::Uhf.clamp(162.55), 400.0);
        assert_eq!(Band::Uhf.clamp(500.0), 480.0);
    }

    #[test]
    fn band_contains() {
        assert!(Band::Vhf.contains(134.0));
        assert!(Band::Vhf.contains(174.0));
        assert!(!Band::Vhf.contains(174.1));
        assert!(Band::Uhf.contains(446.0));
    }

    #[test]
    fn clamp_frequency_below_vhf() {
        assert_eq!(clamp_frequency(50.0), VHF_MIN_MHZ);
    }

    #[test]
    fn clamp_frequency_between_bands() {
        assert_eq!(clamp_frequency(175.0), VHF_MAX_MHZ);
        assert_eq!(clamp_frequency(399.0), VHF_MAX_MHZ);
    }

    #[test]
    fn clamp_frequency_above_uhf() {
        assert_eq!(clamp_frequency(900.0), UHF_MAX_MHZ);
    }

    #[test]
    fn clamp_frequency_in_range_unchanged() {
        assert_eq!(clamp_frequency(162.4), 162.4);
        assert_eq!(clamp_frequency(446.00625), 446.00625);
    }

    #[test]
    fn band_parse_and_display() {
        assert_eq!("VHF".parse::<Band>().unwrap(), Band::Vhf);
        assert_eq!("uhf".parse::<Band>().unwrap(), Band::Uhf);
        assert!("hf".parse::<Band>().is_err());
        assert_eq!(Band::Uhf.to_string(), "UHF");
    }
}
