//! Periodic background probing of every provider

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cost::RequestType;
use super::monitor::HealthMonitor;
use crate::orchestrator::provider::{ProviderOutcome, RouteProvider};

pub struct ProbeScheduler {
    providers: Vec<Arc<dyn RouteProvider>>,
    monitor: Arc<HealthMonitor>,
    interval: Duration,
    timeout: Duration,
}

impl ProbeScheduler {
    pub fn new(
        providers: Vec<Arc<dyn RouteProvider>>,
        monitor: Arc<HealthMonitor>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            monitor,
            interval,
            timeout,
        }
    }

    /// Probe all providers concurrently and record each result.
    ///
    /// Returns the number of providers that failed their probe.
    pub async fn probe_once(&self) -> usize {
        let probes = self.providers.iter().map(|provider| async move {
            let reply = match tokio::time::timeout(self.timeout, provider.probe()).await {
                Ok(reply) => reply,
                Err(_) => {
                    debug!(provider = provider.name(), "probe exceeded its timeout");
                    return (provider.name().to_string(), provider.metered(), ProviderOutcome::Timeout, 0);
                }
            };
            (provider.name().to_string(), provider.metered(), reply.outcome, reply.bytes)
        });

        let mut failed = 0;
        for (name, metered, outcome, bytes) in join_all(probes).await {
            if metered {
                self.monitor.record_usage(&name, RequestType::Probe, bytes);
            }
            if outcome.is_failure() {
                failed += 1;
                warn!(provider = %name, reason = %outcome.describe(), "health probe failed");
                self.monitor.record_failure(&name, &outcome.describe());
            } else {
                self.monitor.record_success(&name);
            }
        }
        failed
    }

    /// Run `probe_once` on the configured interval until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                providers = self.providers.len(),
                interval_secs = self.interval.as_secs(),
                "probe scheduler started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.probe_once().await;
                    }
                }
            }
            info!("probe scheduler stopped");
        })
    }
}
