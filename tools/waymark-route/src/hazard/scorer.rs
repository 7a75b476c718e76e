//! Hazard penalties for a candidate route geometry
//!
//! Distance from a hazard to a route is the minimum over route vertices,
//! not true point-to-segment distance. Providers return dense geometries,
//! so the error stays well inside typical thresholds.

use std::collections::BTreeMap;

use serde::Serialize;
use waymark_common::LatLon;

use super::index::HazardSet;
use super::{Hazard, HazardCategory, HazardPreferences};
use crate::geo::haversine_distance;

/// `1 + 2 * (1 - d / threshold)`, clamped to `[1, 3]`: 3x on the route,
/// 1x at the threshold.
pub fn proximity_multiplier(distance_m: f64, threshold_m: f64) -> f64 {
    if threshold_m <= 0.0 {
        return 3.0;
    }
    (1.0 + 2.0 * (1.0 - distance_m / threshold_m)).clamp(1.0, 3.0)
}

/// Minimum haversine distance from the hazard to any route vertex.
pub fn min_vertex_distance(hazard: &Hazard, geometry: &[LatLon]) -> Option<f64> {
    geometry
        .iter()
        .map(|p| haversine_distance(hazard.lat, hazard.lon, p.lat, p.lon))
        .min_by(f64::total_cmp)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryScore {
    pub count: usize,
    pub penalty_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HazardScore {
    pub penalty_seconds: f64,
    pub hazard_count: usize,
    pub by_category: BTreeMap<HazardCategory, CategoryScore>,
}

/// Scores geometries against a fixed hazard set and preference set.
///
/// Holds only shared references, so one scorer can be used from many
/// threads at once.
pub struct RouteScorer<'a> {
    hazards: &'a HazardSet,
    preferences: &'a HazardPreferences,
}

impl<'a> RouteScorer<'a> {
    pub fn new(hazards: &'a HazardSet, preferences: &'a HazardPreferences) -> Self {
        Self { hazards, preferences }
    }

    pub fn score(&self, geometry: &[LatLon]) -> HazardScore {
        let mut score = HazardScore::default();
        if geometry.is_empty() {
            return score;
        }

        for (&category, hazards) in self.hazards {
            let pref = self.preferences.get(category);
            if !pref.enabled {
                continue;
            }
            for hazard in hazards {
                let Some(d) = min_vertex_distance(hazard, geometry) else {
                    continue;
                };
                if d > pref.proximity_threshold_m {
                    continue;
                }
                let penalty = pref.penalty_seconds * proximity_multiplier(d, pref.proximity_threshold_m);
                let entry = score.by_category.entry(category).or_default();
                entry.count += 1;
                entry.penalty_seconds += penalty;
                score.hazard_count += 1;
                score.penalty_seconds += penalty;
            }
        }
        score
    }
}
