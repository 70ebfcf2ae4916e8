//! # Error Types
//!
//! Custom error types for Fleet Tracker using `thiserror`.

use thiserror::Error;

/// Main error type for Fleet Tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No GPS fix could be obtained (expected while the receiver has no lock)
    #[error("No GPS fix available")]
    FixUnavailable,

    /// Uplink send/subscribe errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Asset identity files missing or unreadable
    #[error("Identity error: {0}")]
    Identity(String),

    /// Command with missing or malformed arguments
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Command refused by local policy
    #[error("Command not permitted: {0}")]
    NotPermitted(String),
}

impl TrackerError {
    /// Whether this error is part of normal operation and only worth a debug line
    pub fn is_expected(&self) -> bool {
        matches!(self, TrackerError::FixUnavailable)
    }
}

/// Result type alias for Fleet Tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
