//! Great-circle helpers shared by snapping, hazard scoring and coverage checks

#[allow(deprecated)]
use geo::HaversineDistance;
use geo::Point;
use serde::{Deserialize, Serialize};
use waymark_common::LatLon;

/// Degrees of latitude per metre, used to turn metric radii into bbox margins.
pub const DEG_PER_METRE: f64 = 1.0 / 111_320.0;

#[allow(deprecated)]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    p1.haversine_distance(&p2)
}

pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Position on the unit sphere.
///
/// Euclidean distance between two such vectors is monotone in great-circle
/// distance, so an R-tree over them answers nearest-neighbour queries
/// correctly across the antimeridian and near the poles.
pub fn unit_vector(lat: f64, lon: f64) -> [f64; 3] {
    let (lat, lon) = (lat.to_radians(), lon.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

/// Axis-aligned lat/lon box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn around(p: LatLon) -> Self {
        Self {
            min_lat: p.lat,
            min_lon: p.lon,
            max_lat: p.lat,
            max_lon: p.lon,
        }
    }

    /// Smallest box containing every point, or `None` for an empty input.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLon>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::around(first), |mut bbox, p| {
            bbox.include(p);
            bbox
        }))
    }

    pub fn include(&mut self, p: LatLon) {
        self.min_lat = self.min_lat.min(p.lat);
        self.min_lon = self.min_lon.min(p.lon);
        self.max_lat = self.max_lat.max(p.lat);
        self.max_lon = self.max_lon.max(p.lon);
    }

    /// Grows the box by `degrees` on every side, clamped to valid ranges.
    pub fn expand(self, degrees: f64) -> Self {
        Self {
            min_lat: (self.min_lat - degrees).max(-90.0),
            min_lon: (self.min_lon - degrees).max(-180.0),
            max_lat: (self.max_lat + degrees).min(90.0),
            max_lon: (self.max_lon + degrees).min(180.0),
        }
    }

    pub fn contains(&self, p: LatLon) -> bool {
        (self.min_lat..=self.max_lat).contains(&p.lat)
            && (self.min_lon..=self.max_lon).contains(&p.lon)
    }
}
