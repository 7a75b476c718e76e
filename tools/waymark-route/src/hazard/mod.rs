//! Road hazards and per-category avoidance preferences

pub mod index;
pub mod scorer;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use index::{HazardHandle, HazardIndex, HazardSet};
pub use scorer::{proximity_multiplier, CategoryScore, HazardScore, RouteScorer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardCategory {
    TrafficEnforcement,
    RedLightCamera,
    Roadworks,
    RailwayCrossing,
    SchoolZone,
    Other,
}

impl HazardCategory {
    pub const ALL: [HazardCategory; 6] = [
        HazardCategory::TrafficEnforcement,
        HazardCategory::RedLightCamera,
        HazardCategory::Roadworks,
        HazardCategory::RailwayCrossing,
        HazardCategory::SchoolZone,
        HazardCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HazardCategory::TrafficEnforcement => "traffic_enforcement",
            HazardCategory::RedLightCamera => "red_light_camera",
            HazardCategory::Roadworks => "roadworks",
            HazardCategory::RailwayCrossing => "railway_crossing",
            HazardCategory::SchoolZone => "school_zone",
            HazardCategory::Other => "other",
        }
    }

    /// Maps an import category name.
    ///
    /// Generic speed cameras are enforcement points and land in
    /// `TrafficEnforcement`, the highest-penalty category.
    pub fn from_import(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let category = match normalized.as_str() {
            "traffic_enforcement" | "speed_camera" | "average_speed_camera" | "mobile_speed_camera"
            | "enforcement" => HazardCategory::TrafficEnforcement,
            "red_light_camera" | "red_light" => HazardCategory::RedLightCamera,
            "roadworks" | "road_works" | "construction" => HazardCategory::Roadworks,
            "railway_crossing" | "level_crossing" => HazardCategory::RailwayCrossing,
            "school_zone" | "school" => HazardCategory::SchoolZone,
            "other" | "hazard" => HazardCategory::Other,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for HazardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub lat: f64,
    pub lon: f64,
    pub category: HazardCategory,
    #[serde(default)]
    pub description: String,
}

/// One row of the hazard import feed, before category mapping.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HazardRecord {
    pub lat: f64,
    pub lon: f64,
    pub category: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardPreference {
    pub category: HazardCategory,
    pub enabled: bool,
    pub proximity_threshold_m: f64,
    pub penalty_seconds: f64,
}

impl HazardPreference {
    pub fn default_for(category: HazardCategory) -> Self {
        let (proximity_threshold_m, penalty_seconds) = match category {
            HazardCategory::TrafficEnforcement => (100.0, 300.0),
            HazardCategory::RedLightCamera => (100.0, 180.0),
            HazardCategory::Roadworks => (200.0, 240.0),
            HazardCategory::RailwayCrossing => (50.0, 120.0),
            HazardCategory::SchoolZone => (300.0, 150.0),
            HazardCategory::Other => (100.0, 60.0),
        };
        Self {
            category,
            enabled: true,
            proximity_threshold_m,
            penalty_seconds,
        }
    }
}

/// The full preference set, one entry per category.
#[derive(Debug, Clone, PartialEq)]
pub struct HazardPreferences {
    prefs: BTreeMap<HazardCategory, HazardPreference>,
}

impl Default for HazardPreferences {
    fn default() -> Self {
        Self {
            prefs: HazardCategory::ALL
                .iter()
                .map(|&c| (c, HazardPreference::default_for(c)))
                .collect(),
        }
    }
}

impl HazardPreferences {
    pub fn get(&self, category: HazardCategory) -> HazardPreference {
        self.prefs
            .get(&category)
            .copied()
            .unwrap_or_else(|| HazardPreference::default_for(category))
    }

    pub fn set(&mut self, pref: HazardPreference) {
        self.prefs.insert(pref.category, pref);
    }

    pub fn set_enabled(&mut self, category: HazardCategory, enabled: bool) {
        let mut pref = self.get(category);
        pref.enabled = enabled;
        self.set(pref);
    }

    pub fn iter(&self) -> impl Iterator<Item = &HazardPreference> {
        self.prefs.values()
    }

    pub fn enabled_categories(&self) -> impl Iterator<Item = HazardCategory> + '_ {
        self.prefs.values().filter(|p| p.enabled).map(|p| p.category)
    }
}
