//! # GPS Feed
//!
//! Latest-fix holder shared between the serial reader and its consumers.
//!
//! The serial reader publishes every fix at the receiver's own rate; the
//! decision loop and command handlers sample it whenever they need to, so the
//! report cadence is decoupled from the NMEA output rate.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use super::cache::PositionCache;
use crate::error::{Result, TrackerError};
use crate::geo::Position;

/// A fix and the moment it was received
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: Position,
    pub received_at: Instant,
}

/// Position-producing collaborator consumed by the engine and dispatcher
#[async_trait]
pub trait FixProvider: Send + Sync {
    /// Latest fix if it is no older than `max_age`
    fn cached(&self, max_age: Duration) -> Option<Position>;

    /// Best last-known fix of any age, falling back to the position cache file
    async fn last_known(&self) -> Option<Position>;

    /// Wait for a fix newer than the call, bounded by `timeout`
    async fn acquire(&self, timeout: Duration) -> Result<Position>;
}

/// Fix feed backed by a `watch` channel
pub struct GpsFeed {
    latest: watch::Sender<Option<Sample>>,
    cache: Option<PositionCache>,
}

impl GpsFeed {
    /// Create an empty feed with an optional cache-file fallback
    pub fn new(cache: Option<PositionCache>) -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest, cache }
    }

    /// Record a new fix from the receiver
    pub fn publish(&self, position: Position) {
        self.latest.send_replace(Some(Sample {
            position,
            received_at: Instant::now(),
        }));
    }

    /// Latest sample regardless of age
    pub fn latest(&self) -> Option<Sample> {
        *self.latest.borrow()
    }

    async fn read_cache(&self) -> Option<Position> {
        let cache = self.cache.as_ref()?;
        match cache.read().await {
            Ok(position) => Some(position),
            Err(e) => {
                debug!("Position cache {} unusable: {}", cache.path().display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl FixProvider for GpsFeed {
    fn cached(&self, max_age: Duration) -> Option<Position> {
        self.latest()
            .filter(|sample| sample.received_at.elapsed() <= max_age)
            .map(|sample| sample.position)
    }

    async fn last_known(&self) -> Option<Position> {
        match self.latest() {
            Some(sample) => Some(sample.position),
            None => self.read_cache().await,
        }
    }

    async fn acquire(&self, timeout: Duration) -> Result<Position> {
        // subscribe() marks the current value as seen, so only newer fixes count
        let mut rx = self.latest.subscribe();

        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let sample = *rx.borrow_and_update();
                if let Some(sample) = sample {
                    return Some(sample.position);
                }
            }
        };

        if let Ok(Some(position)) = tokio::time::timeout(timeout, wait).await {
            return Ok(position);
        }

        debug!("No fresh fix within {:?}, trying position cache", timeout);
        self.read_cache().await.ok_or(TrackerError::FixUnavailable)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Fix provider returning canned answers and counting acquisitions
    #[derive(Clone, Default)]
    pub struct StaticFixes {
        pub cached: Arc<Mutex<Option<Position>>>,
        pub last_known: Arc<Mutex<Option<Position>>>,
        pub acquired: Arc<Mutex<Option<Position>>>,
        pub acquire_calls: Arc<Mutex<usize>>,
    }

    impl StaticFixes {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_cached(&self, position: Option<Position>) {
            *self.cached.lock().unwrap() = position;
        }

        pub fn set_last_known(&self, position: Option<Position>) {
            *self.last_known.lock().unwrap() = position;
        }

        pub fn set_acquired(&self, position: Option<Position>) {
            *self.acquired.lock().unwrap() = position;
        }

        pub fn acquire_count(&self) -> usize {
            *self.acquire_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl FixProvider for StaticFixes {
        fn cached(&self, _max_age: Duration) -> Option<Position> {
            *self.cached.lock().unwrap()
        }

        async fn last_known(&self) -> Option<Position> {
            *self.last_known.lock().unwrap()
        }

        async fn acquire(&self, _timeout: Duration) -> Result<Position> {
            *self.acquire_calls.lock().unwrap() += 1;
            let acquired = *self.acquired.lock().unwrap();
            acquired.ok_or(TrackerError::FixUnavailable)
        }
    }
}
