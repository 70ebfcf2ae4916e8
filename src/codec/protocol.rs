//! # Wire Protocol Types
//!
//! Framing constants and the tagged decode result.

use serde::Deserialize;

/// Field separator used by every payload
pub const FIELD_SEPARATOR: char = ':';

/// Upper bound on inflated payload size
///
/// Inbound messages are a few hundred bytes at most; anything inflating past
/// this is rejected as malformed.
pub const MAX_INFLATED_SIZE: u64 = 64 * 1024;

/// Outbound payload representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireForm {
    /// Colon-delimited ASCII, as sent by legacy units
    Plain,

    /// zlib-compressed then base64-armored
    Armored,
}

/// Decoded inbound payload, tagged with the form it arrived in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload was plain colon-delimited text
    Plain(Vec<String>),

    /// Payload had to be inflated before splitting
    Compressed(Vec<String>),
}

impl Frame {
    /// Fields of the payload regardless of the wire form
    pub fn fields(&self) -> &[String] {
        match self {
            Frame::Plain(fields) | Frame::Compressed(fields) => fields,
        }
    }

    pub fn into_fields(self) -> Vec<String> {
        match self {
            Frame::Plain(fields) | Frame::Compressed(fields) => fields,
        }
    }

    /// Wire form this frame was received in
    pub fn form(&self) -> WireForm {
        match self {
            Frame::Plain(_) => WireForm::Plain,
            Frame::Compressed(_) => WireForm::Armored,
        }
    }
}

/// Split text into colon-separated fields
pub fn split_fields(text: &str) -> Vec<String> {
    text.split(FIELD_SEPARATOR).map(str::to_string).collect()
}
