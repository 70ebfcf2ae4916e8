//! # Agent State
//!
//! Asset identity and the single mutable state shared by the decision loop
//! and the command dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::IdentityConfig;
use crate::error::{Result, TrackerError};
use crate::geo::Position;

/// Persistent asset identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub truck_id: String,
    pub asset_uuid: String,
}

/// Files holding the asset identity, one value per file
#[derive(Debug, Clone)]
pub struct IdentityStore {
    truck_file: PathBuf,
    uuid_file: PathBuf,
}

impl IdentityStore {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            truck_file: config.truck_file.clone(),
            uuid_file: config.uuid_file.clone(),
        }
    }

    /// Read both identity files
    ///
    /// # Errors
    ///
    /// Returns `Identity` if either file is missing, unreadable or empty.
    /// Callers treat this as fatal at startup.
    pub fn load(&self) -> Result<Identity> {
        let truck_id = read_first_line(&self.truck_file)?;
        let asset_uuid = read_first_line(&self.uuid_file)?;
        info!("Loaded identity: truck {} (asset {})", truck_id, asset_uuid);
        Ok(Identity { truck_id, asset_uuid })
    }

    /// Re-read the persisted truck id
    pub async fn read_truck(&self) -> Result<String> {
        let contents = tokio::fs::read_to_string(&self.truck_file).await?;
        Ok(first_line(&contents))
    }

    /// Replace the persisted truck id with a single line
    pub async fn write_truck(&self, truck_id: &str) -> Result<()> {
        tokio::fs::write(&self.truck_file, format!("{}\n", truck_id)).await?;
        info!("Persisted truck id {} to {}", truck_id, self.truck_file.display());
        Ok(())
    }
}

fn read_first_line(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TrackerError::Identity(format!("Failed to read {}: {}", path.display(), e)))?;

    let value = first_line(&contents);
    if value.is_empty() {
        return Err(TrackerError::Identity(format!("{} is empty", path.display())));
    }
    Ok(value)
}

fn first_line(contents: &str) -> String {
    contents.lines().next().unwrap_or_default().trim().to_string()
}

/// Mutable tracker state
///
/// Position, time and payload fields are owned by the report engine; the
/// truck id is owned by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    /// Last position actually reported (or dedup-suppressed)
    pub last_reported_position: Option<Position>,

    /// When the last report decision reset the timer; `None` before the first
    pub last_report_time: Option<Instant>,

    /// Bytes of the last payload the transport accepted
    pub last_sent_payload: Option<Vec<u8>>,

    /// Day/night multiplier applied to every interval
    pub cadence_multiplier: u32,

    pub truck_id: String,
    pub asset_uuid: String,
}

/// State handle shared by the decision loop and the dispatcher
pub type SharedState = Arc<Mutex<AgentState>>;

impl AgentState {
    pub fn new(identity: Identity) -> Self {
        Self {
            last_reported_position: None,
            last_report_time: None,
            last_sent_payload: None,
            cadence_multiplier: 1,
            truck_id: identity.truck_id,
            asset_uuid: identity.asset_uuid,
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Time since the last report, `None` if nothing was reported yet
    pub fn elapsed_since_report(&self, now: Instant) -> Option<Duration> {
        self.last_report_time.map(|last| now.saturating_duration_since(last))
    }

    /// Reset the report timer; never moves it backward
    pub fn mark_report_time(&mut self, now: Instant) {
        self.last_report_time = Some(match self.last_report_time {
            Some(previous) if previous > now => previous,
            _ => now,
        });
    }

    /// Record a report of `position` decided at `now`
    pub fn mark_reported(&mut self, position: Position, now: Instant) {
        self.last_reported_position = Some(position);
        self.mark_report_time(now);
    }
}
