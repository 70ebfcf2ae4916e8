//! # Payload Decoder
//!
//! Detects the wire form of an inbound payload and splits it into fields.

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

use super::protocol::{split_fields, Frame, FIELD_SEPARATOR, MAX_INFLATED_SIZE};
use crate::error::{Result, TrackerError};

/// Decode an inbound payload
///
/// Plain text is tried first: if the payload is UTF-8 and already contains a
/// colon it is split after dropping any trailing CR/LF. Otherwise the payload
/// is inflated (after removing base64 armor when present) and the inflated
/// text is split exactly as it was compressed.
///
/// Fields ending in CR or LF therefore only survive the armored form.
///
/// # Errors
///
/// Returns `Decode` if the payload is neither plain text with a colon nor a
/// valid compressed payload.
///
/// # Examples
///
/// ```
/// use fleet_tracker::codec::{decode, Frame};
///
/// let frame = decode(b"truck:get")?;
/// assert_eq!(frame, Frame::Plain(vec!["truck".into(), "get".into()]));
/// # Ok::<(), fleet_tracker::error::TrackerError>(())
/// ```
pub fn decode(payload: &[u8]) -> Result<Frame> {
    if let Ok(text) = std::str::from_utf8(payload) {
        if text.contains(FIELD_SEPARATOR) {
            return Ok(Frame::Plain(split_fields(trim_line_end(text))));
        }
    }

    let inflated = inflate_payload(payload).ok_or_else(|| {
        TrackerError::Decode(format!(
            "payload of {} bytes is neither plain nor compressed",
            payload.len()
        ))
    })?;

    let text = String::from_utf8(inflated)
        .map_err(|_| TrackerError::Decode("inflated payload is not UTF-8".to_string()))?;

    Ok(Frame::Compressed(split_fields(&text)))
}

/// Strip the line terminator plain-text senders append
fn trim_line_end(text: &str) -> &str {
    text.trim_end_matches(['\r', '\n'])
}

/// Inflate armored or raw compressed bytes
fn inflate_payload(payload: &[u8]) -> Option<Vec<u8>> {
    let armored = std::str::from_utf8(payload).map(str::trim).unwrap_or_default();

    if !armored.is_empty() {
        if let Ok(unarmored) = STANDARD.decode(armored) {
            if let Some(inflated) = inflate(&unarmored) {
                return Some(inflated);
            }
        }
    }

    inflate(payload)
}

/// Inflate a zlib stream, falling back to a bare deflate stream
fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    read_capped(ZlibDecoder::new(data)).or_else(|| read_capped(DeflateDecoder::new(data)))
}

fn read_capped<R: Read>(reader: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut limited = reader.take(MAX_INFLATED_SIZE + 1);
    limited.read_to_end(&mut out).ok()?;

    if out.is_empty() || out.len() as u64 > MAX_INFLATED_SIZE {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encoder::{compress, encode};
    use crate::codec::protocol::WireForm;

    fn fields(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_payload() {
        let frame = decode(b"tail:20:/var/log/gpsd.log").unwrap();
        assert_eq!(frame, Frame::Plain(fields(&["tail", "20", "/var/log/gpsd.log"])));
    }

    #[test]
    fn test_plain_payload_trailing_newline() {
        let frame = decode(b"truck:get\n").unwrap();
        assert_eq!(frame.fields(), &fields(&["truck", "get"])[..]);
    }

    #[test]
    fn test_armored_payload() {
        let payload = encode(&["truck", "set", "T-42"], WireForm::Armored).unwrap();
        let frame = decode(&payload).unwrap();
        assert_eq!(frame, Frame::Compressed(fields(&["truck", "set", "T-42"])));
    }

    #[test]
    fn test_raw_zlib_payload() {
        let payload = compress(b"cmd:reboot").unwrap();
        let frame = decode(&payload).unwrap();
        assert_eq!(frame, Frame::Compressed(fields(&["cmd", "reboot"])));
    }

    #[test]
    fn test_raw_deflate_payload() {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"gps:").unwrap();
        let payload = encoder.finish().unwrap();

        let frame = decode(&payload).unwrap();
        assert_eq!(frame.fields(), &fields(&["gps", ""])[..]);
    }

    #[test]
    fn test_compressed_verb_without_colon_is_single_field() {
        let payload = encode(&["gpsd"], WireForm::Armored).unwrap();
        let frame = decode(&payload).unwrap();
        assert_eq!(frame, Frame::Compressed(fields(&["gpsd"])));
    }

    #[test]
    fn test_plain_without_colon_is_invalid() {
        let err = decode(b"gps").unwrap_err();
        assert!(matches!(err, TrackerError::Decode(_)));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(decode(&[0xff, 0x00, 0x13, 0x37]).is_err());
        assert!(decode(b"").is_err());
    }

    #[test]
    fn test_plain_and_armored_agree() {
        let values = fields(&["40.00501", "-75.1", "12.5"]);
        for form in [WireForm::Plain, WireForm::Armored] {
            let payload = encode(&values, form).unwrap();
            assert_eq!(decode(&payload).unwrap().into_fields(), values);
        }
    }

    #[test]
    fn test_armored_keeps_trailing_line_break() {
        let values = fields(&["tail", "/x", "a\n"]);
        let payload = encode(&values, WireForm::Armored).unwrap();
        assert_eq!(decode(&payload).unwrap().into_fields(), values);
    }

    #[test]
    fn test_plain_drops_trailing_line_break() {
        let payload = encode(&["tail", "/x", "a\r\n"], WireForm::Plain).unwrap();
        assert_eq!(decode(&payload).unwrap().into_fields(), fields(&["tail", "/x", "a"]));
    }

    #[test]
    fn test_oversized_inflation_rejected() {
        let bomb = vec![b'a'; (MAX_INFLATED_SIZE as usize) * 2];
        let payload = compress(&bomb).unwrap();
        assert!(decode(&payload).is_err());
    }
}
