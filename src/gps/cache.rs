//! Side-channel position cache written by an external fix-acquisition helper.
//!
//! The file holds a single line `latitude:longitude[:speed[:altitude]]`.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, TrackerError};
use crate::geo::Position;

/// Reader for the position cache file
#[derive(Debug, Clone)]
pub struct PositionCache {
    path: PathBuf,
}

impl PositionCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached position
    ///
    /// # Errors
    ///
    /// * `Io` - the file could not be read
    /// * `FixUnavailable` - the helper wrote no usable coordinates (e.g. `nan`)
    pub async fn read(&self) -> Result<Position> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let position = parse_cache_line(&contents).ok_or(TrackerError::FixUnavailable)?;
        debug!("Read cached position {} from {}", position, self.path.display());
        Ok(position)
    }
}

/// Parse `lat:lon[:speed[:alt]]`; extra fields are ignored
pub fn parse_cache_line(line: &str) -> Option<Position> {
    let mut parts = line.trim().split(':');
    let latitude: f64 = parts.next()?.trim().parse().ok()?;
    let longitude: f64 = parts.next()?.trim().parse().ok()?;

    let position = Position::new(latitude, longitude);
    // The helper writes 0.0/nan before the receiver has locked
    if !position.is_valid() || (latitude == 0.0 && longitude == 0.0) {
        return None;
    }
    Some(position)
}
