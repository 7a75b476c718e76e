//! Alert records, filtering and delivery

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    EngineFailure,
    EngineDown,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: u64,
    pub engine: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub engine: Option<String>,
    pub severity: Option<AlertSeverity>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        self.engine.as_deref().map_or(true, |e| e == alert.engine)
            && self.severity.map_or(true, |s| s == alert.severity)
            && self.resolved.map_or(true, |r| r == alert.is_resolved())
    }
}

/// Delivery channel for new alerts. The monitor calls it from its own
/// delivery thread, never from the thread that recorded the alert.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &Alert);
}

/// Writes alerts to the tracing log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Info => info!(id = alert.id, engine = %alert.engine, kind = ?alert.alert_type, "{}", alert.message),
            AlertSeverity::Warning => warn!(id = alert.id, engine = %alert.engine, kind = ?alert.alert_type, "{}", alert.message),
            AlertSeverity::Critical => error!(id = alert.id, engine = %alert.engine, kind = ?alert.alert_type, "{}", alert.message),
        }
    }
}

/// Bounded alert history with time-window deduplication.
#[derive(Debug)]
pub(crate) struct AlertLog {
    alerts: VecDeque<Alert>,
    next_id: u64,
    capacity: usize,
}

impl AlertLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::new(),
            next_id: 1,
            capacity,
        }
    }

    /// Records a new alert unless an alert of the same engine and type was
    /// raised within `dedup_window`. Recovery alerts are never deduplicated.
    pub(crate) fn raise(
        &mut self,
        engine: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        now: DateTime<Utc>,
        dedup_window: Duration,
    ) -> Option<Alert> {
        if alert_type != AlertType::Recovery {
            let duplicate = self.alerts.iter().rev().any(|a| {
                a.engine == engine && a.alert_type == alert_type && now - a.created_at < dedup_window
            });
            if duplicate {
                return None;
            }
        }

        let alert = Alert {
            id: self.next_id,
            engine: engine.to_string(),
            alert_type,
            severity,
            message,
            created_at: now,
            resolved_at: None,
        };
        self.next_id += 1;
        self.alerts.push_back(alert.clone());
        while self.alerts.len() > self.capacity {
            self.alerts.pop_front();
        }
        Some(alert)
    }

    pub(crate) fn resolve(&mut self, id: u64, now: DateTime<Utc>) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) if alert.resolved_at.is_none() => {
                alert.resolved_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn resolve_engine(&mut self, engine: &str, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for alert in self
            .alerts
            .iter_mut()
            .filter(|a| a.engine == engine && a.resolved_at.is_none())
        {
            alert.resolved_at = Some(now);
            count += 1;
        }
        count
    }

    /// Matching alerts, newest first.
    pub(crate) fn query(&self, filter: &AlertFilter) -> Vec<Alert> {
        let iter = self.alerts.iter().rev().filter(|a| filter.matches(a)).cloned();
        match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_inside_window_are_suppressed() {
        let mut log = AlertLog::new(100);
        let t0 = Utc::now();
        let window = Duration::minutes(5);
        assert!(log
            .raise("osrm", AlertType::EngineFailure, AlertSeverity::Warning, "x".into(), t0, window)
            .is_some());
        assert!(log
            .raise("osrm", AlertType::EngineFailure, AlertSeverity::Warning, "x".into(), t0 + Duration::minutes(4), window)
            .is_none());
        assert!(log
            .raise("osrm", AlertType::EngineFailure, AlertSeverity::Warning, "x".into(), t0 + Duration::minutes(6), window)
            .is_some());
        // Recovery is exempt.
        assert!(log
            .raise("osrm", AlertType::Recovery, AlertSeverity::Info, "ok".into(), t0, window)
            .is_some());
        assert!(log
            .raise("osrm", AlertType::Recovery, AlertSeverity::Info, "ok".into(), t0, window)
            .is_some());
    }

    #[test]
    fn resolve_by_id_and_by_engine() {
        let mut log = AlertLog::new(100);
        let now = Utc::now();
        let w = Duration::minutes(5);
        let a = log.raise("a", AlertType::EngineFailure, AlertSeverity::Warning, "".into(), now, w).unwrap();
        log.raise("a", AlertType::EngineDown, AlertSeverity::Critical, "".into(), now, w);
        log.raise("b", AlertType::EngineDown, AlertSeverity::Critical, "".into(), now, w);

        assert!(log.resolve(a.id, now));
        assert!(!log.resolve(a.id, now));
        assert_eq!(log.resolve_engine("a", now), 1);

        let open = log.query(&AlertFilter {
            resolved: Some(false),
            ..AlertFilter::default()
        });
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].engine, "b");

        let critical = log.query(&AlertFilter {
            severity: Some(AlertSeverity::Critical),
            limit: Some(1),
            ..AlertFilter::default()
        });
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].engine, "b");
    }

    #[test]
    fn history_is_bounded() {
        let mut log = AlertLog::new(2);
        let now = Utc::now();
        for engine in ["a", "b", "c"] {
            log.raise(engine, AlertType::Recovery, AlertSeverity::Info, "".into(), now, Duration::zero());
        }
        let all = log.query(&AlertFilter::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, 3);
    }
}
