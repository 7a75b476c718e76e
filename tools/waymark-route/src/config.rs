//! Service configuration loaded from TOML
//!
//! Every section carries `#[serde(default)]`, so a partial file (or an
//! empty one) yields a usable configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use waymark_common::{Error, LatLon, Result};

use crate::engine::VehicleType;
use crate::hazard::{HazardCategory, HazardPreferences};
use crate::health::{MonitorConfig, ProviderPricing};
use crate::orchestrator::cache::CacheConfig;
use crate::orchestrator::OrchestratorConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    pub providers: Vec<ProviderConfig>,
    pub health: HealthConfig,
    pub cache: CacheSection,
    pub routing: RoutingConfig,
    pub hazards: HazardConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub graph_path: PathBuf,
    pub index_path: PathBuf,
    pub max_snap_radius_m: f64,
    pub coverage_margin_deg: f64,
    pub dataset_version: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            graph_path: PathBuf::from("data/graph.wgr"),
            index_path: PathBuf::from("data/index.wch"),
            max_snap_radius_m: 500.0,
            coverage_margin_deg: 0.05,
            dataset_version: None,
        }
    }
}

/// One external OSRM-compatible routing backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Profile name per vehicle type (`car`, `truck`, `motorcycle`).
    #[serde(default)]
    pub vehicle_profiles: BTreeMap<String, String>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cost_per_request_usd: f64,
    #[serde(default)]
    pub cost_per_gb_usd: f64,
    /// Fixed `lat,lon` pair routed by the health probe.
    #[serde(default)]
    pub probe_from: Option<String>,
    #[serde(default)]
    pub probe_to: Option<String>,
}

fn default_profile() -> String {
    "driving".to_string()
}

fn default_provider_timeout() -> u64 {
    20
}

impl ProviderConfig {
    pub fn profile_for(&self, vehicle: VehicleType) -> &str {
        self.vehicle_profiles
            .get(vehicle.as_str())
            .map(String::as_str)
            .unwrap_or(&self.profile)
    }

    pub fn pricing(&self) -> ProviderPricing {
        ProviderPricing {
            per_request_usd: self.cost_per_request_usd,
            per_gb_usd: self.cost_per_gb_usd,
        }
    }

    /// The probe route, when both ends are configured.
    pub fn probe_pair(&self) -> Result<Option<(LatLon, LatLon)>> {
        match (&self.probe_from, &self.probe_to) {
            (Some(from), Some(to)) => Ok(Some((from.parse()?, to.parse()?))),
            (None, None) => Ok(None),
            _ => Err(Error::Config(format!(
                "provider '{}': probe_from and probe_to must be set together",
                self.name
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub alert_threshold: u32,
    pub dedup_window_secs: u64,
    pub uptime_window_hours: u64,
    pub spike_threshold_pct: f64,
    pub trailing_days: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 300,
            probe_timeout_secs: 5,
            alert_threshold: 3,
            dedup_window_secs: 300,
            uptime_window_hours: 24,
            spike_threshold_pct: 20.0,
            trailing_days: 7,
        }
    }
}

impl HealthConfig {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            alert_threshold: self.alert_threshold,
            dedup_window: chrono::Duration::seconds(self.dedup_window_secs as i64),
            uptime_window: chrono::Duration::hours(self.uptime_window_hours as i64),
            trailing_days: self.trailing_days,
            spike_threshold_pct: self.spike_threshold_pct,
            ..MonitorConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub ttl_secs: u64,
    pub capacity: usize,
    /// Decimal places kept when rounding coordinates into cache keys.
    pub coordinate_precision: u32,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            capacity: 10_000,
            coordinate_precision: 5,
        }
    }
}

impl CacheSection {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.ttl_secs),
            capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub request_timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 45,
        }
    }
}

/// Partial override of one category's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceOverride {
    pub enabled: Option<bool>,
    pub proximity_threshold_m: Option<f64>,
    pub penalty_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HazardConfig {
    pub path: Option<PathBuf>,
    pub buffer_deg: f64,
    pub refresh_interval_secs: u64,
    /// Keyed by category name, e.g. `[hazards.preferences.roadworks]`.
    pub preferences: BTreeMap<String, PreferenceOverride>,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            path: None,
            buffer_deg: 0.1,
            refresh_interval_secs: 3600,
            preferences: BTreeMap::new(),
        }
    }
}

impl HazardConfig {
    /// Built-in defaults with the configured overrides applied.
    pub fn preferences(&self) -> Result<HazardPreferences> {
        let mut prefs = HazardPreferences::default();
        for (name, o) in &self.preferences {
            let category = HazardCategory::from_import(name)
                .ok_or_else(|| Error::Config(format!("unknown hazard category '{name}'")))?;
            let mut pref = prefs.get(category);
            if let Some(enabled) = o.enabled {
                pref.enabled = enabled;
            }
            if let Some(threshold) = o.proximity_threshold_m {
                if !threshold.is_finite() || threshold <= 0.0 {
                    return Err(Error::Config(format!(
                        "hazard category '{name}': proximity_threshold_m must be positive"
                    )));
                }
                pref.proximity_threshold_m = threshold;
            }
            if let Some(penalty) = o.penalty_seconds {
                pref.penalty_seconds = penalty.max(0.0);
            }
            prefs.set(pref);
        }
        Ok(prefs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Requests served at once; the rest wait.
    pub concurrency_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            concurrency_limit: 512,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: ServiceConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for p in &self.providers {
            if p.name == crate::state::LOCAL_PROVIDER || !seen.insert(p.name.as_str()) {
                return Err(Error::Config(format!("duplicate provider name '{}'", p.name)));
            }
            p.probe_pair()?;
        }
        if self.cache.capacity == 0 {
            return Err(Error::Config("cache capacity must be at least 1".to_string()));
        }
        self.hazards.preferences()?;
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            request_timeout: Duration::from_secs(self.routing.request_timeout_secs),
            hazard_buffer_deg: self.hazards.buffer_deg,
            coordinate_precision: self.cache.coordinate_precision,
        }
    }
}
