//! # Fleet Tracker Library
//!
//! GPS telemetry agent for fleet vehicles on a metered cellular uplink.
//!
//! This library provides the reporting core: deciding when a position fix is
//! worth transmitting, encoding uplink payloads, and dispatching the small
//! remote-command protocol (location refresh, shell, log tail, truck id).

pub mod agent;
pub mod codec;
pub mod config;
pub mod error;
pub mod geo;
pub mod gps;
pub mod transport;
