//! WGS84 coordinates as they arrive from clients and providers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RouteError;

/// A validated latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    /// Builds a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, RouteError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(RouteError::InvalidCoordinate(format!(
                "latitude {lat} outside [-90, 90]"
            )));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(RouteError::InvalidCoordinate(format!(
                "longitude {lon} outside [-180, 180]"
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Rounds both axes to a fixed number of decimals as integer units.
    ///
    /// Five decimals is roughly one metre at the equator.
    pub fn quantize(&self, decimals: u32) -> (i64, i64) {
        let scale = 10f64.powi(decimals as i32);
        (
            (self.lat * scale).round() as i64,
            (self.lon * scale).round() as i64,
        )
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Parses `"lat,lon"`, the form used on the command line and in query strings.
impl FromStr for LatLon {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s.split_once(',').ok_or_else(|| {
            RouteError::InvalidCoordinate(format!("expected 'lat,lon', got '{s}'"))
        })?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| RouteError::InvalidCoordinate(format!("bad latitude in '{s}'")))?;
        let lon: f64 = lon
            .trim()
            .parse()
            .map_err(|_| RouteError::InvalidCoordinate(format!("bad longitude in '{s}'")))?;
        LatLon::new(lat, lon)
    }
}
