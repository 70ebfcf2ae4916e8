//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::codec::WireForm;
use crate::error::{Result, TrackerError};
use crate::geo::DistanceUnit;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "FLEET_TRACKER_CONFIG";

/// Configuration file used when the environment variable is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fleet-tracker/config.toml";

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gps: GpsConfig,
    pub report: ReportConfig,
    pub identity: IdentityConfig,
    pub transport: TransportConfig,
    pub commands: CommandsConfig,
    pub logging: LoggingConfig,
}

/// GPS receiver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_gps_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_fix_max_age_secs")]
    pub fix_max_age_secs: u64,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    #[serde(default)]
    pub position_cache_file: Option<PathBuf>,

    #[serde(default = "default_apply_hemisphere_sign")]
    pub apply_hemisphere_sign: bool,
}

/// Report decision configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,

    #[serde(default = "default_distance_unit")]
    pub distance_unit: DistanceUnit,

    #[serde(default = "default_base_interval_secs")]
    pub base_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_day_multiplier")]
    pub day_multiplier: u32,

    #[serde(default = "default_night_multiplier")]
    pub night_multiplier: u32,

    /// Hours strictly before this are night
    #[serde(default = "default_night_before_hour")]
    pub night_before_hour: u32,

    /// Hours strictly after this are night
    #[serde(default = "default_night_after_hour")]
    pub night_after_hour: u32,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_wire_form")]
    pub wire_form: WireForm,
}

/// Asset identity files
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    #[serde(default = "default_truck_file")]
    pub truck_file: PathBuf,

    #[serde(default = "default_uuid_file")]
    pub uuid_file: PathBuf,
}

/// Cellular uplink configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_transport_host")]
    pub host: String,

    #[serde(default = "default_transport_port")]
    pub port: u16,

    #[serde(default)]
    pub device_key: String,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Address of the inbound message socket; empty disables receiving
    #[serde(default = "default_receive_bind")]
    pub receive_bind: String,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

/// Remote command configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default)]
    pub shell_enabled: bool,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_tail_max_lines")]
    pub tail_max_lines: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_gps_port() -> String { "/dev/ttyAMA0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_read_timeout_ms() -> u64 { 5000 }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_fix_max_age_secs() -> u64 { 60 }
fn default_acquire_timeout_secs() -> u64 { 30 }
fn default_apply_hemisphere_sign() -> bool { true }

fn default_distance_threshold() -> f64 { 0.75 }
fn default_distance_unit() -> DistanceUnit { DistanceUnit::Miles }
fn default_base_interval_secs() -> u64 { 120 }
fn default_heartbeat_interval_secs() -> u64 { 880 }
fn default_day_multiplier() -> u32 { 2 }
fn default_night_multiplier() -> u32 { 20 }
fn default_night_before_hour() -> u32 { 8 }
fn default_night_after_hour() -> u32 { 18 }
fn default_poll_interval_secs() -> u64 { 30 }
fn default_wire_form() -> WireForm { WireForm::Plain }

fn default_truck_file() -> PathBuf { PathBuf::from("/etc/cl-lcr-truck") }
fn default_uuid_file() -> PathBuf { PathBuf::from("/etc/cl-lcr-uuid") }

fn default_transport_host() -> String { "cloudsocket.hologram.io".to_string() }
fn default_transport_port() -> u16 { 9999 }
fn default_send_timeout_ms() -> u64 { 10000 }
fn default_receive_bind() -> String { "127.0.0.1:4010".to_string() }
fn default_max_message_bytes() -> usize { 4096 }

fn default_shell() -> String { "/bin/sh".to_string() }
fn default_tail_max_lines() -> usize { 200 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "fleet-tracker.log".to_string() }

/// Longest accepted interval or fix age (one day)
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Largest accepted cadence multiplier
const MAX_CADENCE_MULTIPLIER: u32 = 100;

fn invalid(message: impl std::fmt::Display) -> TrackerError {
    TrackerError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fleet_tracker::config::Config;
    ///
    /// let config = Config::load("/etc/fleet-tracker/config.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // GPS receiver
        if self.gps.port.is_empty() {
            return Err(invalid("gps port cannot be empty"));
        }

        if ![4800, 9600, 19200, 38400, 57600, 115200].contains(&self.gps.baud_rate) {
            return Err(invalid("baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200"));
        }

        if self.gps.read_timeout_ms == 0 || self.gps.read_timeout_ms > 60000 {
            return Err(invalid("read_timeout_ms must be between 1 and 60000"));
        }

        if self.gps.reconnect_interval_ms == 0 || self.gps.reconnect_interval_ms > 600000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 600000"));
        }

        if self.gps.fix_max_age_secs == 0 || self.gps.fix_max_age_secs > MAX_INTERVAL_SECS {
            return Err(invalid(format!("fix_max_age_secs must be between 1 and {}", MAX_INTERVAL_SECS)));
        }

        if self.gps.acquire_timeout_secs == 0 || self.gps.acquire_timeout_secs > 600 {
            return Err(invalid("acquire_timeout_secs must be between 1 and 600"));
        }

        // Report decisions
        if !self.report.distance_threshold.is_finite() || self.report.distance_threshold <= 0.0 {
            return Err(invalid("distance_threshold must be a positive number"));
        }

        if self.report.base_interval_secs == 0 || self.report.base_interval_secs > MAX_INTERVAL_SECS {
            return Err(invalid(format!("base_interval_secs must be between 1 and {}", MAX_INTERVAL_SECS)));
        }

        if self.report.heartbeat_interval_secs < self.report.base_interval_secs
            || self.report.heartbeat_interval_secs > MAX_INTERVAL_SECS
        {
            return Err(invalid(format!(
                "heartbeat_interval_secs must be between base_interval_secs and {}",
                MAX_INTERVAL_SECS
            )));
        }

        let multipliers = [self.report.day_multiplier, self.report.night_multiplier];
        if multipliers.iter().any(|m| *m == 0 || *m > MAX_CADENCE_MULTIPLIER) {
            return Err(invalid(format!(
                "day_multiplier and night_multiplier must be between 1 and {}",
                MAX_CADENCE_MULTIPLIER
            )));
        }

        if self.report.night_before_hour > 23 || self.report.night_after_hour > 23 {
            return Err(invalid("night hours must be between 0 and 23"));
        }

        if self.report.poll_interval_secs == 0 || self.report.poll_interval_secs > self.report.base_interval_secs {
            return Err(invalid("poll_interval_secs must be between 1 and base_interval_secs"));
        }

        // Identity
        if self.identity.truck_file.as_os_str().is_empty() || self.identity.uuid_file.as_os_str().is_empty() {
            return Err(invalid("identity file paths cannot be empty"));
        }

        // Transport
        if self.transport.host.is_empty() {
            return Err(invalid("transport host cannot be empty"));
        }

        if self.transport.device_key.is_empty() {
            return Err(invalid("transport device_key cannot be empty"));
        }

        if self.transport.send_timeout_ms == 0 || self.transport.send_timeout_ms > 120000 {
            return Err(invalid("send_timeout_ms must be between 1 and 120000"));
        }

        if !self.transport.receive_bind.is_empty() {
            match self.transport.receive_bind.parse::<SocketAddr>() {
                Ok(addr) if addr.ip().is_loopback() => {}
                Ok(_) => {
                    return Err(invalid(format!(
                        "receive_bind '{}' must be a loopback address",
                        self.transport.receive_bind
                    )));
                }
                Err(_) => {
                    return Err(invalid(format!(
                        "receive_bind '{}' is not a valid socket address",
                        self.transport.receive_bind
                    )));
                }
            }
        }

        if self.transport.max_message_bytes == 0 {
            return Err(invalid("max_message_bytes must be greater than 0"));
        }

        // Commands
        if self.commands.shell_enabled && self.commands.shell.is_empty() {
            return Err(invalid("shell cannot be empty when shell_enabled"));
        }

        if self.commands.tail_max_lines == 0 {
            return Err(invalid("tail_max_lines must be greater than 0"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        if self.logging.dir.is_some() && self.logging.file_prefix.is_empty() {
            return Err(invalid("file_prefix cannot be empty when a log dir is set"));
        }

        Ok(())
    }
}
