//! Service assembly: loads every snapshot and wires the providers

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use waymark_common::Result;

use crate::config::ServiceConfig;
use crate::engine::{EngineHandle, PathfindingEngine};
use crate::formats::{graph_file, index_file};
use crate::hazard::{HazardHandle, HazardIndex, HazardPreferences};
use crate::health::{HealthMonitor, LogAlertSink, ProbeScheduler};
use crate::orchestrator::{
    LocalProvider, OsrmProvider, RouteCache, RouteProvider, RoutingOrchestrator,
};

/// Provider name of the in-process engine.
pub const LOCAL_PROVIDER: &str = "local";

pub struct ServiceState {
    pub config: ServiceConfig,
    pub engine: Arc<EngineHandle>,
    pub hazards: Arc<HazardHandle>,
    pub monitor: Arc<HealthMonitor>,
    pub orchestrator: Arc<RoutingOrchestrator>,
    /// Preferences applied when a request does not override them.
    pub default_preferences: HazardPreferences,
}

impl ServiceState {
    pub fn load(config: ServiceConfig) -> Result<Self> {
        let start = Instant::now();
        let engine = Arc::new(EngineHandle::new(load_engine(&config)?));

        let hazard_index = match &config.hazards.path {
            Some(path) => HazardIndex::load(path)?,
            None => HazardIndex::new(Vec::new()),
        };
        let hazards = Arc::new(HazardHandle::new(hazard_index));
        let default_preferences = config.hazards.preferences()?;

        let monitor = Arc::new(
            HealthMonitor::new(config.health.monitor_config()).with_sink(Arc::new(LogAlertSink)),
        );
        let mut providers: Vec<Arc<dyn RouteProvider>> =
            vec![Arc::new(LocalProvider::new(LOCAL_PROVIDER, engine.clone()))];
        for p in &config.providers {
            monitor.set_pricing(&p.name, p.pricing());
            providers.push(Arc::new(OsrmProvider::new(p.clone())?));
        }

        let orchestrator = Arc::new(RoutingOrchestrator::new(
            providers,
            monitor.clone(),
            hazards.clone(),
            RouteCache::new(config.cache.cache_config()),
            config.orchestrator_config(),
        ));

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            dataset = config.engine.dataset_version.as_deref().unwrap_or("unversioned"),
            hazards = hazards.current().len(),
            "service state loaded"
        );
        Ok(Self {
            config,
            engine,
            hazards,
            monitor,
            orchestrator,
            default_preferences,
        })
    }

    /// Re-reads graph and index from the configured paths and swaps the
    /// engine snapshot. Queries already running finish on the old snapshot.
    /// Cached routes are dropped since they may describe the old network.
    pub fn reload_engine(&self) -> Result<Arc<PathfindingEngine>> {
        let start = Instant::now();
        let engine = load_engine(&self.config)?;
        self.engine.swap(engine);
        self.orchestrator.clear_cache();
        let current = self.engine.current();
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            nodes = current.graph().n_nodes(),
            shortcuts = current.index().n_shortcuts(),
            "engine reloaded"
        );
        Ok(current)
    }

    /// Starts the probe scheduler and, with a hazard file, the refresh task.
    pub fn spawn_background(&self, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        let health = &self.config.health;
        let scheduler = ProbeScheduler::new(
            self.orchestrator.providers().to_vec(),
            self.monitor.clone(),
            Duration::from_secs(health.probe_interval_secs.max(1)),
            Duration::from_secs(health.probe_timeout_secs.max(1)),
        );
        let mut tasks = vec![scheduler.spawn(token.clone())];
        if let Some(path) = &self.config.hazards.path {
            tasks.push(self.hazards.clone().spawn_refresh(
                path.clone(),
                Duration::from_secs(self.config.hazards.refresh_interval_secs.max(1)),
                token.clone(),
            ));
        }
        tasks
    }
}

fn load_engine(config: &ServiceConfig) -> Result<PathfindingEngine> {
    let graph = Arc::new(graph_file::read(&config.engine.graph_path)?);
    let index = Arc::new(index_file::read(&config.engine.index_path, &graph)?);
    Ok(PathfindingEngine::new(
        graph,
        index,
        config.engine.max_snap_radius_m,
        config.engine.coverage_margin_deg,
    )?)
}
