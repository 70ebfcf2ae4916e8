//! # Geographic Helpers
//!
//! Position type and great-circle distance used by the report decision engine.

use serde::Deserialize;
use std::fmt;

/// Mean Earth radius in statute miles
pub const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Mean Earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// A single position fix in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in degrees (positive north)
    pub latitude: f64,

    /// Longitude in degrees (positive east)
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Both coordinates are finite and inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.latitude, self.longitude)
    }
}

/// Unit the movement threshold is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Miles,
    Kilometers,
}

impl DistanceUnit {
    fn earth_radius(self) -> f64 {
        match self {
            DistanceUnit::Miles => EARTH_RADIUS_MILES,
            DistanceUnit::Kilometers => EARTH_RADIUS_KM,
        }
    }
}

/// Great-circle distance between two positions.
///
/// Uses the haversine formula, which stays accurate over the short hops a
/// vehicle makes between reports.
///
/// # Examples
///
/// ```
/// use fleet_tracker::geo::{great_circle_distance, DistanceUnit, Position};
///
/// let a = Position::new(40.0, -75.0);
/// let b = Position::new(41.0, -75.0);
/// let miles = great_circle_distance(a, b, DistanceUnit::Miles);
/// assert!((miles - 69.09).abs() < 0.1);
/// ```
pub fn great_circle_distance(from: Position, to: Position, unit: DistanceUnit) -> f64 {
    let lat1_rad = from.latitude * DEG_TO_RAD;
    let lat2_rad = to.latitude * DEG_TO_RAD;
    let delta_lat = (to.latitude - from.latitude) * DEG_TO_RAD;
    let delta_lon = (to.longitude - from.longitude) * DEG_TO_RAD;

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    unit.earth_radius() * c
}
