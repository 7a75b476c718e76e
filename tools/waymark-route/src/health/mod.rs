//! Provider health: liveness, alerts, probes and cost accounting

pub mod alerts;
pub mod cost;
pub mod monitor;
pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use alerts::{Alert, AlertFilter, AlertSeverity, AlertSink, AlertType, LogAlertSink};
pub use cost::{CostReport, CostTracker, ProviderPricing, RequestType};
pub use monitor::{HealthMonitor, MonitorConfig};
pub use probe::ProbeScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub state: ProviderState,
    pub consecutive_failures: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub uptime_ratio: f64,
    pub checks_in_window: usize,
}
