//! Process clock, local hour of day and the day/night cadence.

use chrono::Timelike;
use std::time::Instant;

use crate::config::ReportConfig;

/// Time source for report decisions
pub trait Clock: Send + Sync {
    /// Monotonic process time
    fn now(&self) -> Instant;

    /// Local wall-clock hour, 0-23
    fn local_hour(&self) -> u32;
}

/// Real clock: `Instant` for intervals, local time for the cadence
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

/// Day/night interval multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    day_multiplier: u32,
    night_multiplier: u32,
    night_before_hour: u32,
    night_after_hour: u32,
}

impl Cadence {
    pub fn from_config(config: &ReportConfig) -> Self {
        Self {
            day_multiplier: config.day_multiplier,
            night_multiplier: config.night_multiplier,
            night_before_hour: config.night_before_hour,
            night_after_hour: config.night_after_hour,
        }
    }

    /// Night is any hour before `night_before_hour` or after `night_after_hour`
    pub fn is_night(&self, hour: u32) -> bool {
        hour < self.night_before_hour || hour > self.night_after_hour
    }

    pub fn multiplier_for(&self, hour: u32) -> u32 {
        if self.is_night(hour) {
            self.night_multiplier
        } else {
            self.day_multiplier
        }
    }
}
