//! ISO-8601 durations as used by MPD attributes.
//!
//! Seconds are decomposed with fixed average lengths (365-day year, 30-day
//! month). Zero components are left out, the `T` separator is always written
//! and seconds keep millisecond precision.

use crate::error::{PackagerError, Result};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;
const MONTH_MS: u64 = 30 * DAY_MS;
const YEAR_MS: u64 = 365 * DAY_MS;

/// Format `seconds` as `P[nY][nM][nD]T[nH][nM][nS]`
pub fn format_iso8601(seconds: f64) -> Result<String> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(PackagerError::InvalidDuration(seconds));
    }

    let mut ms = (seconds * 1000.0).round() as u64;
    let mut out = String::from("P");

    for (unit, suffix) in [(YEAR_MS, 'Y'), (MONTH_MS, 'M'), (DAY_MS, 'D')] {
        let n = ms / unit;
        if n > 0 {
            out.push_str(&format!("{}{}", n, suffix));
        }
        ms %= unit;
    }

    out.push('T');

    for (unit, suffix) in [(HOUR_MS, 'H'), (MINUTE_MS, 'M')] {
        let n = ms / unit;
        if n > 0 {
            out.push_str(&format!("{}{}", n, suffix));
        }
        ms %= unit;
    }

    if ms > 0 || out == "PT" {
        out.push_str(&format_seconds(ms));
        out.push('S');
    }

    Ok(out)
}

/// Milliseconds as seconds with trailing zeros trimmed
fn format_seconds(ms: u64) -> String {
    let whole = ms / 1000;
    let frac = ms % 1000;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:03}", frac);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours_minutes_seconds() {
        assert_eq!(format_iso8601(3725.0).unwrap(), "PT1H2M5S");
    }

    #[test]
    fn test_sub_second() {
        assert_eq!(format_iso8601(0.5).unwrap(), "PT0.5S");
        assert_eq!(format_iso8601(1.25).unwrap(), "PT1.25S");
        assert_eq!(format_iso8601(9.999).unwrap(), "PT9.999S");
    }

    #[test]
    fn test_whole_units_omit_seconds() {
        assert_eq!(format_iso8601(60.0).unwrap(), "PT1M");
        assert_eq!(format_iso8601(3600.0).unwrap(), "PT1H");
        assert_eq!(format_iso8601(86400.0).unwrap(), "P1DT");
    }

    #[test]
    fn test_calendar_components() {
        assert_eq!(format_iso8601(90061.0).unwrap(), "P1DT1H1M1S");
        assert_eq!(
            format_iso8601(365.0 * 86400.0 + 30.0 * 86400.0 + 2.0).unwrap(),
            "P1Y1MT2S"
        );
    }

    #[test]
    fn test_tiny_value_rounds_to_zero_seconds() {
        assert_eq!(format_iso8601(0.0001).unwrap(), "PT0S");
    }

    #[test]
    fn test_rejects_non_positive() {
        assert!(matches!(
            format_iso8601(0.0),
            Err(PackagerError::InvalidDuration(_))
        ));
        assert!(format_iso8601(-2.0).is_err());
        assert!(format_iso8601(f64::NAN).is_err());
        assert!(format_iso8601(f64::INFINITY).is_err());
    }
}
