//! # NMEA Sentence Parser
//!
//! Extracts positions from the GGA and RMC sentences emitted by the receiver.
//!
//! ## Coordinate Format
//!
//! NMEA carries coordinates as `ddmm.mmmm` (latitude) and `dddmm.mmmm`
//! (longitude) with a separate hemisphere letter. Southern and western
//! hemispheres are negated when hemisphere sign correction is enabled.

use crate::error::{Result, TrackerError};
use crate::geo::Position;

/// Outcome of parsing a single sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sentence {
    /// Sentence carried a valid position
    Fix(Position),

    /// Position sentence reporting no satellite lock
    NoFix,

    /// Sentence type we do not use (GSV, VTG, ...)
    Other,
}

/// Parse one NMEA line
///
/// # Arguments
///
/// * `line` - Raw sentence, with or without trailing CR/LF
/// * `apply_hemisphere_sign` - Negate S latitudes and W longitudes
///
/// # Errors
///
/// Returns `Serial` if the sentence is truncated, fails its checksum or
/// carries unparsable coordinates.
///
/// # Examples
///
/// ```
/// use fleet_tracker::gps::nmea::{parse_sentence, Sentence};
///
/// let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
/// match parse_sentence(line, true)? {
///     Sentence::Fix(p) => assert!((p.latitude - 48.1173).abs() < 1e-4),
///     other => panic!("unexpected {:?}", other),
/// }
/// # Ok::<(), fleet_tracker::error::TrackerError>(())
/// ```
pub fn parse_sentence(line: &str, apply_hemisphere_sign: bool) -> Result<Sentence> {
    let line = line.trim();
    let body = line
        .strip_prefix('$')
        .ok_or_else(|| malformed("missing '$' prefix", line))?;

    let body = match body.split_once('*') {
        Some((data, checksum)) => {
            verify_checksum(data, checksum)?;
            data
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let talker_type = fields[0];
    if talker_type.len() < 5 {
        return Ok(Sentence::Other);
    }

    match talker_type.get(talker_type.len() - 3..) {
        Some("GGA") => parse_gga(&fields, apply_hemisphere_sign),
        Some("RMC") => parse_rmc(&fields, apply_hemisphere_sign),
        _ => Ok(Sentence::Other),
    }
}

/// `$xxGGA,time,lat,N,lon,E,quality,sats,hdop,alt,M,...`
fn parse_gga(fields: &[&str], apply_sign: bool) -> Result<Sentence> {
    if fields.len() < 7 {
        return Err(malformed("GGA too short", fields[0]));
    }

    // Quality 0 means the receiver has no lock
    if fields[6].is_empty() || fields[6] == "0" {
        return Ok(Sentence::NoFix);
    }

    parse_coordinates(fields[2], fields[3], fields[4], fields[5], apply_sign)
}

/// `$xxRMC,time,status,lat,N,lon,E,speed,course,date,...`
fn parse_rmc(fields: &[&str], apply_sign: bool) -> Result<Sentence> {
    if fields.len() < 7 {
        return Err(malformed("RMC too short", fields[0]));
    }

    if fields[2] != "A" {
        return Ok(Sentence::NoFix);
    }

    parse_coordinates(fields[3], fields[4], fields[5], fields[6], apply_sign)
}

fn parse_coordinates(
    lat: &str,
    lat_hemisphere: &str,
    lon: &str,
    lon_hemisphere: &str,
    apply_sign: bool,
) -> Result<Sentence> {
    if lat.is_empty() || lon.is_empty() {
        return Ok(Sentence::NoFix);
    }

    let mut latitude = degrees_minutes(lat, 2)?;
    let mut longitude = degrees_minutes(lon, 3)?;

    if apply_sign {
        if lat_hemisphere == "S" {
            latitude = -latitude;
        }
        if lon_hemisphere == "W" {
            longitude = -longitude;
        }
    }

    let position = Position::new(latitude, longitude);
    if !position.is_valid() {
        return Err(malformed("coordinates out of range", lat));
    }

    Ok(Sentence::Fix(position))
}

/// Convert `dddmm.mmmm` into decimal degrees
fn degrees_minutes(value: &str, degree_digits: usize) -> Result<f64> {
    if value.len() <= degree_digits || !value.is_char_boundary(degree_digits) {
        return Err(malformed("coordinate too short", value));
    }

    let (deg, min) = value.split_at(degree_digits);
    let degrees: f64 = deg.parse().map_err(|_| malformed("bad degrees", value))?;
    let minutes: f64 = min.parse().map_err(|_| malformed("bad minutes", value))?;

    if !(0.0..60.0).contains(&minutes) {
        return Err(malformed("minutes out of range", value));
    }

    Ok(degrees + minutes / 60.0)
}

fn verify_checksum(data: &str, checksum: &str) -> Result<()> {
    let expected = u8::from_str_radix(checksum.trim(), 16)
        .map_err(|_| malformed("bad checksum field", checksum))?;
    let calculated = data.bytes().fold(0u8, |acc, b| acc ^ b);

    if calculated != expected {
        return Err(TrackerError::Serial(format!(
            "NMEA checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
            expected, calculated
        )));
    }
    Ok(())
}

fn malformed(reason: &str, context: &str) -> TrackerError {
    TrackerError::Serial(format!("Malformed NMEA sentence ({}): {}", reason, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA_MUNICH: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    fn with_checksum(body: &str) -> String {
        let cs = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}", body, cs)
    }

    fn expect_fix(sentence: Sentence) -> Position {
        match sentence {
            Sentence::Fix(p) => p,
            other => panic!("Expected fix, got {:?}", other),
        }
    }

    #[test]
    fn test_gga_fix() {
        let p = expect_fix(parse_sentence(GGA_MUNICH, true).unwrap());
        assert!((p.latitude - 48.1173).abs() < 1e-4);
        assert!((p.longitude - 11.516_666).abs() < 1e-4);
    }

    #[test]
    fn test_gga_no_lock() {
        let line = with_checksum("GPGGA,123519,,,,,0,00,,,M,,M,,");
        assert_eq!(parse_sentence(&line, true).unwrap(), Sentence::NoFix);
    }

    #[test]
    fn test_western_hemisphere_sign() {
        let line = with_checksum("GNGGA,010203,4000.000,N,07500.000,W,1,07,1.0,10.0,M,,M,,");
        let p = expect_fix(parse_sentence(&line, true).unwrap());
        assert_eq!(p, Position::new(40.0, -75.0));
    }

    #[test]
    fn test_hemisphere_sign_disabled() {
        let line = with_checksum("GPGGA,010203,3352.000,S,15112.000,E,1,07,1.0,10.0,M,,M,,");
        let p = expect_fix(parse_sentence(&line, false).unwrap());
        assert!(p.latitude > 0.0);
        let p = expect_fix(parse_sentence(&line, true).unwrap());
        assert!(p.latitude < 0.0);
    }

    #[test]
    fn test_rmc_active_and_void() {
        let active = with_checksum("GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E");
        let p = expect_fix(parse_sentence(&active, true).unwrap());
        assert!((p.latitude + 37.860_833).abs() < 1e-4);

        let void = with_checksum("GPRMC,081836,V,,,,,,,130998,,");
        assert_eq!(parse_sentence(&void, true).unwrap(), Sentence::NoFix);
    }

    #[test]
    fn test_checksum_mismatch() {
        let line = GGA_MUNICH.replace("*47", "*48");
        match parse_sentence(&line, true) {
            Err(TrackerError::Serial(message)) => {
                assert!(message.contains("expected 0x48, got 0x47"), "{}", message);
            }
            other => panic!("Expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_sentence_without_checksum_is_accepted() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";
        assert!(matches!(parse_sentence(line, true).unwrap(), Sentence::Fix(_)));
    }

    #[test]
    fn test_other_sentences_ignored() {
        let line = with_checksum("GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00");
        assert_eq!(parse_sentence(&line, true).unwrap(), Sentence::Other);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_sentence("not nmea", true).is_err());
        let line = with_checksum("GPGGA,123519,48xx.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert!(parse_sentence(&line, true).is_err());
    }

    #[test]
    fn test_truncated_gga_rejected() {
        let line = with_checksum("GPGGA,123519,4807.038");
        assert!(parse_sentence(&line, true).is_err());
    }
}
