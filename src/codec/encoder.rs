//! # Payload Encoder
//!
//! Joins fields into a payload and applies the requested wire form.

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use super::protocol::{WireForm, FIELD_SEPARATOR};
use crate::error::Result;

/// Encode fields into an outbound payload
///
/// # Arguments
///
/// * `fields` - Ordered payload fields, joined with `:`
/// * `form` - Wire form to emit
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Payload bytes ready for the transport
///
/// # Examples
///
/// ```
/// use fleet_tracker::codec::{encode, WireForm};
///
/// let payload = encode(&["40.005", "-75"], WireForm::Plain)?;
/// assert_eq!(payload, b"40.005:-75");
/// # Ok::<(), fleet_tracker::error::TrackerError>(())
/// ```
pub fn encode<S: AsRef<str>>(fields: &[S], form: WireForm) -> Result<Vec<u8>> {
    let text = join_fields(fields);

    match form {
        WireForm::Plain => Ok(text.into_bytes()),
        WireForm::Armored => {
            let compressed = compress(text.as_bytes())?;
            Ok(STANDARD.encode(compressed).into_bytes())
        }
    }
}

fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    let mut text = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            text.push(FIELD_SEPARATOR);
        }
        text.push_str(field.as_ref());
    }
    text
}

/// zlib-compress raw bytes at the best ratio (airtime costs more than CPU)
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
