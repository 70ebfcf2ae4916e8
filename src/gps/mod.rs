//! # GPS Module
//!
//! Position source for the tracker.
//!
//! This module handles:
//! - Parsing NMEA GGA/RMC sentences from the receiver
//! - Reading the receiver's serial port at its own rate
//! - Keeping the latest fix for the periodic decision loop
//! - Falling back to the side-channel position cache file

pub mod cache;
pub mod feed;
pub mod nmea;
pub mod reader;

pub use feed::{FixProvider, GpsFeed};
