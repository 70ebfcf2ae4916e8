//! # Message Codec Module
//!
//! Wire payload encoding for the cellular uplink.
//!
//! This module handles:
//! - Colon-delimited field framing (`verb:arg:arg`)
//! - Legacy plain ASCII payloads
//! - zlib-compressed, base64-armored payloads
//! - Content-based detection of the two forms on decode

pub mod protocol;
pub mod encoder;
pub mod decoder;

pub use decoder::decode;
pub use encoder::encode;
pub use protocol::{Frame, WireForm};
