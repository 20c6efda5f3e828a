//! Conversion and formatting helpers.

/// Convert a raw signal-strength reading (0–255) to an S-unit (1–9).
///
/// Uses the dongle's empirical calibration
/// `S = round(9.73 * ln(0.0297 * raw) - 1.88)`, clamped to `[1, 9]`.
/// A raw value of zero has no logarithm and reads as S1.
///
/// # Example
///
/// ```
/// use kv4p_core::s_units_from_raw;
///
/// assert_eq!(s_units_from_raw(0), 1);
/// assert_eq!(s_units_from_raw(255), 9);
/// ```
pub fn s_units_from_raw(raw: u8) -> u8 {
    if raw == 0 {
        return 1;
    }
    let s = 9.73 * (0.0297 * f64::from(raw)).ln() - 1.88;
    s.round().clamp(1.0, 9.0) as u8
}

/// Map a squelch percentage (0–100) to the module's 0–255 scale.
///
/// Values above 100 are treated as 100.
pub fn squelch_from_percent(percent: u8) -> u8 {
    let p = u32::from(percent.min(100));
    (255 * p / 100) as u8
}

/// Format a frequency in MHz with the standard six-decimal display precision.
///
/// ```
/// use kv4p_core::format_freq_mhz;
///
/// assert_eq!(format_freq_mhz(162.55), "162.550000 MHz");
/// ```
pub fn format_freq_mhz(mhz: f64) -> String {
    format!("{mhz:.6} MHz")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s_units_zero_is_floor() {
        assert_eq!(s_units_from_raw(0), 1);
    }

    #[test]
    fn s_units_weak_signals_floor() {
        // ln(0.0297) is negative; small readings clamp to S1.
        assert_eq!(s_units_from_raw(1), 1);
        assert_eq!(s_units_from_raw(40), 1);
    }

    #[test]
    fn s_units_reference_points() {
        // 9.73 * ln(0.0297 * 100) - 1.88 = 8.71 -> 9
        assert_eq!(s_units_from_raw(100), 9);
        // 9.73 * ln(0.0297 * 60) - 1.88 = 3.74 -> 4
        assert_eq!(s_units_from_raw(60), 4);
        // 9.73 * ln(0.0297 * 50) - 1.88 = 1.97 -> 2
        assert_eq!(s_units_from_raw(50), 2);
    }

    #[test]
    fn s_units_saturate_at_nine() {
        assert_eq!(s_units_from_raw(200), 9);
        assert_eq!(s_units_from_raw(255), 9);
    }

    #[test]
    fn s_units_monotonic_and_bounded() {
        let mut prev = s_units_from_raw(0);
        for raw in 1..=255u8 {
            let s = s_units_from_raw(raw);
            assert!((1..=9).contains(&s), "raw {raw} gave S{s}");
            assert!(s >= prev, "raw {raw}: S{s} < S{prev}");
            prev = s;
        }
    }

    #[test]
    fn squelch_percent_mapping() {
        assert_eq!(squelch_from_percent(0), 0);
        assert_eq!(squelch_from_percent(50), 127);
        assert_eq!(squelch_from_percent(100), 255);
        assert_eq!(squelch_from_percent(200), 255);
    }

    #[test]
    fn format_freq() {
        assert_eq!(format_freq_mhz(162.4), "162.400000 MHz");
        assert_eq!(format_freq_mhz(446.00625), "446.006250 MHz");
    }
}
