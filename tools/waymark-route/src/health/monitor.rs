//! Provider liveness state machine
//!
//! One coarse lock guards all provider records and the alert log. Updates
//! are rare (periodic probes plus inline request outcomes), so contention
//! is negligible. New alerts are queued for a dedicated delivery thread,
//! so a slow or panicking sink never reaches the caller.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::alerts::{Alert, AlertFilter, AlertLog, AlertSeverity, AlertSink, AlertType};
use super::cost::{CostReport, CostTracker, ProviderPricing, RequestType};
use super::{ProviderState, ProviderStatus};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Consecutive failures that mark a provider down.
    pub alert_threshold: u32,
    pub dedup_window: Duration,
    pub uptime_window: Duration,
    pub alert_capacity: usize,
    pub trailing_days: u32,
    pub spike_threshold_pct: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 3,
            dedup_window: Duration::minutes(5),
            uptime_window: Duration::hours(24),
            alert_capacity: 1_000,
            trailing_days: 7,
            spike_threshold_pct: 20.0,
        }
    }
}

#[derive(Debug)]
struct ProviderHealth {
    state: ProviderState,
    consecutive_failures: u32,
    last_check: Option<DateTime<Utc>>,
    last_error: Option<String>,
    checks: VecDeque<(DateTime<Utc>, bool)>,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            state: ProviderState::Up,
            consecutive_failures: 0,
            last_check: None,
            last_error: None,
            checks: VecDeque::new(),
        }
    }

    fn push_check(&mut self, now: DateTime<Utc>, ok: bool, window: Duration) {
        self.last_check = Some(now);
        self.checks.push_back((now, ok));
        while self
            .checks
            .front()
            .is_some_and(|(t, _)| now - *t > window)
        {
            self.checks.pop_front();
        }
    }

    fn uptime_ratio(&self) -> f64 {
        if self.checks.is_empty() {
            return 1.0;
        }
        let up = self.checks.iter().filter(|(_, ok)| *ok).count();
        up as f64 / self.checks.len() as f64
    }
}

struct MonitorInner {
    providers: BTreeMap<String, ProviderHealth>,
    alerts: AlertLog,
}

pub struct HealthMonitor {
    config: MonitorConfig,
    inner: Mutex<MonitorInner>,
    costs: Mutex<CostTracker>,
    outbox: Option<mpsc::Sender<Alert>>,
}

/// Alerts waiting for the sink beyond this are dropped with a warning.
const ALERT_QUEUE: usize = 256;

impl HealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let costs = CostTracker::new(config.trailing_days, config.spike_threshold_pct);
        let alerts = AlertLog::new(config.alert_capacity);
        Self {
            config,
            inner: Mutex::new(MonitorInner {
                providers: BTreeMap::new(),
                alerts,
            }),
            costs: Mutex::new(costs),
            outbox: None,
        }
    }

    /// Delivers new alerts to `sink` from a background thread. The thread
    /// exits once the monitor is dropped.
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Alert>(ALERT_QUEUE);
        let spawned = std::thread::Builder::new()
            .name("alert-delivery".to_string())
            .spawn(move || {
                while let Some(alert) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(|| sink.deliver(&alert))).is_err() {
                        warn!(id = alert.id, engine = %alert.engine, "alert sink panicked");
                    }
                }
            });
        match spawned {
            Ok(_) => self.outbox = Some(tx),
            Err(e) => warn!(error = %e, "alert delivery disabled: cannot start thread"),
        }
        self
    }

    pub fn register(&self, name: &str) {
        self.inner
            .lock()
            .providers
            .entry(name.to_string())
            .or_insert_with(ProviderHealth::new);
    }

    pub fn set_pricing(&self, name: &str, pricing: ProviderPricing) {
        self.costs.lock().set_pricing(name, pricing);
    }

    pub fn record_success(&self, name: &str) -> Vec<Alert> {
        self.record_success_at(name, Utc::now())
    }

    pub fn record_failure(&self, name: &str, reason: &str) -> Vec<Alert> {
        self.record_failure_at(name, reason, Utc::now())
    }

    pub fn record_success_at(&self, name: &str, now: DateTime<Utc>) -> Vec<Alert> {
        let emitted = {
            let mut inner = self.inner.lock();
            let MonitorInner { providers, alerts } = &mut *inner;
            let health = providers
                .entry(name.to_string())
                .or_insert_with(ProviderHealth::new);
            health.push_check(now, true, self.config.uptime_window);

            let was_failing = health.consecutive_failures >= 1;
            let previous = health.state;
            health.consecutive_failures = 0;
            health.state = ProviderState::Up;
            health.last_error = None;

            if previous != ProviderState::Up {
                info!(provider = name, from = ?previous, "provider back up");
            }
            if was_failing {
                alerts
                    .raise(
                        name,
                        AlertType::Recovery,
                        AlertSeverity::Info,
                        format!("{name} recovered"),
                        now,
                        self.config.dedup_window,
                    )
                    .into_iter()
                    .collect()
            } else {
                Vec::new()
            }
        };
        self.deliver(&emitted);
        emitted
    }

    pub fn record_failure_at(&self, name: &str, reason: &str, now: DateTime<Utc>) -> Vec<Alert> {
        let emitted = {
            let mut inner = self.inner.lock();
            let MonitorInner { providers, alerts } = &mut *inner;
            let health = providers
                .entry(name.to_string())
                .or_insert_with(ProviderHealth::new);
            health.push_check(now, false, self.config.uptime_window);
            health.consecutive_failures += 1;
            health.last_error = Some(reason.to_string());

            let failures = health.consecutive_failures;
            let threshold = self.config.alert_threshold.max(1);
            let previous = health.state;
            health.state = if failures >= threshold {
                ProviderState::Down
            } else {
                ProviderState::Degraded
            };
            if health.state != previous {
                warn!(provider = name, failures, state = ?health.state, reason, "provider state changed");
            }

            let mut emitted = Vec::new();
            if failures == 1 {
                emitted.extend(alerts.raise(
                    name,
                    AlertType::EngineFailure,
                    AlertSeverity::Warning,
                    format!("{name} failed: {reason}"),
                    now,
                    self.config.dedup_window,
                ));
            }
            if failures == threshold {
                emitted.extend(alerts.raise(
                    name,
                    AlertType::EngineDown,
                    AlertSeverity::Critical,
                    format!("{name} is down after {failures} consecutive failures: {reason}"),
                    now,
                    self.config.dedup_window,
                ));
            }
            emitted
        };
        self.deliver(&emitted);
        emitted
    }

    fn deliver(&self, alerts: &[Alert]) {
        let Some(outbox) = &self.outbox else {
            return;
        };
        for alert in alerts {
            if let Err(e) = outbox.try_send(alert.clone()) {
                warn!(id = alert.id, error = %e, "alert not delivered");
            }
        }
    }

    pub fn state(&self, name: &str) -> Option<ProviderState> {
        self.inner.lock().providers.get(name).map(|h| h.state)
    }

    /// Whether the orchestrator may send traffic to `name`. Unknown
    /// providers are usable until they fail.
    pub fn is_usable(&self, name: &str) -> bool {
        self.state(name) != Some(ProviderState::Down)
    }

    pub fn status(&self, name: &str) -> Option<ProviderStatus> {
        self.inner
            .lock()
            .providers
            .get(name)
            .map(|h| status_of(name, h))
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.inner
            .lock()
            .providers
            .iter()
            .map(|(name, h)| status_of(name, h))
            .collect()
    }

    pub fn alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.inner.lock().alerts.query(filter)
    }

    pub fn resolve_alert(&self, id: u64) -> bool {
        self.inner.lock().alerts.resolve(id, Utc::now())
    }

    pub fn resolve_alerts_for(&self, engine: &str) -> usize {
        self.inner.lock().alerts.resolve_engine(engine, Utc::now())
    }

    pub fn record_usage(&self, name: &str, request_type: RequestType, bytes: u64) {
        self.record_usage_on(name, request_type, bytes, Utc::now().date_naive());
    }

    pub fn record_usage_on(&self, name: &str, request_type: RequestType, bytes: u64, day: NaiveDate) {
        self.costs.lock().record(name, request_type, bytes, day);
    }

    pub fn cost_report(&self, history_days: u32) -> CostReport {
        self.costs
            .lock()
            .report(Utc::now().date_naive(), history_days)
    }

    pub fn cost_csv(&self) -> String {
        self.costs.lock().export_csv()
    }
}

fn status_of(name: &str, h: &ProviderHealth) -> ProviderStatus {
    ProviderStatus {
        name: name.to_string(),
        state: h.state,
        consecutive_failures: h.consecutive_failures,
        last_check: h.last_check,
        last_error: h.last_error.clone(),
        uptime_ratio: h.uptime_ratio(),
        checks_in_window: h.checks.len(),
    }
}
