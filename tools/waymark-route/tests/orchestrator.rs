//! Provider failover, caching and hazard ranking through the orchestrator

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use waymark_common::{LatLon, RouteError};
use waymark_route::engine::EngineHandle;
use waymark_route::hazard::{Hazard, HazardCategory, HazardHandle, HazardIndex, HazardPreferences};
use waymark_route::health::{
    Alert, AlertFilter, AlertSeverity, AlertSink, HealthMonitor, MonitorConfig, ProviderState,
};
use waymark_route::orchestrator::{
    CacheConfig, CandidateRoute, LocalProvider, OrchestratorConfig, ProviderOutcome, ProviderReply,
    ProviderRequest, RouteCache, RouteProvider, RouteRequest, RoutingOrchestrator,
};
use waymark_route::VehicleParams;

struct Scripted {
    name: &'static str,
    outcome: ProviderOutcome,
    delay: Duration,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(name: &'static str, outcome: ProviderOutcome) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn route(&self, _request: &ProviderRequest) -> ProviderReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        ProviderReply {
            outcome: self.outcome.clone(),
            bytes: 2_048,
        }
    }

    async fn probe(&self) -> ProviderReply {
        ProviderReply::local(ProviderOutcome::Routes(Vec::new()))
    }
}

fn at(lat: f64, lon: f64) -> LatLon {
    LatLon::new(lat, lon).unwrap()
}

fn routes(duration_s: f64) -> ProviderOutcome {
    ProviderOutcome::Routes(vec![CandidateRoute {
        distance_m: 12_000.0,
        duration_s,
        geometry: vec![at(50.0, 4.0), at(50.05, 4.0), at(50.1, 4.0)],
    }])
}

fn request(hazard_avoidance: bool) -> RouteRequest {
    RouteRequest {
        start: at(50.0, 4.0),
        end: at(50.1, 4.0),
        vehicle: VehicleParams::default(),
        hazard_avoidance,
        preferences: HazardPreferences::default(),
    }
}

fn orchestrator_with(
    providers: Vec<Arc<dyn RouteProvider>>,
    hazards: Vec<Hazard>,
    config: OrchestratorConfig,
) -> (RoutingOrchestrator, Arc<HealthMonitor>) {
    let monitor = Arc::new(HealthMonitor::new(MonitorConfig::default()));
    let orchestrator = RoutingOrchestrator::new(
        providers,
        monitor.clone(),
        Arc::new(HazardHandle::new(HazardIndex::new(hazards))),
        RouteCache::new(CacheConfig::default()),
        config,
    );
    (orchestrator, monitor)
}

fn orchestrator(providers: Vec<Arc<dyn RouteProvider>>) -> (RoutingOrchestrator, Arc<HealthMonitor>) {
    orchestrator_with(providers, Vec::new(), OrchestratorConfig::default())
}

#[tokio::test]
async fn second_identical_request_is_cached() {
    let provider = Scripted::new("osrm", routes(600.0));
    let (o, _) = orchestrator(vec![provider.clone()]);

    let first = o.route(&request(false)).await.unwrap();
    let second = o.route(&request(false)).await.unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.routes, second.routes);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn hazard_flag_never_shares_cache_entries() {
    let camera = Hazard {
        lat: 50.05,
        lon: 4.0,
        category: HazardCategory::TrafficEnforcement,
        description: "fixed camera".into(),
    };
    let provider = Scripted::new("osrm", routes(600.0));
    let (o, _) = orchestrator_with(vec![provider.clone()], vec![camera], OrchestratorConfig::default());

    let avoiding = o.route(&request(true)).await.unwrap();
    assert!(!avoiding.cached);
    assert_eq!(avoiding.routes[0].hazard_count, 1);
    assert!((avoiding.routes[0].hazard_penalty_seconds - 900.0).abs() < 1e-6);

    let plain = o.route(&request(false)).await.unwrap();
    assert!(!plain.cached);
    assert_eq!(plain.routes[0].hazard_penalty_seconds, 0.0);
    assert_eq!(plain.routes[0].hazard_count, 0);
    assert_eq!(provider.calls(), 2);

    assert!(o.route(&request(true)).await.unwrap().cached);
    assert!(o.route(&request(false)).await.unwrap().cached);
}

#[tokio::test]
async fn failing_provider_is_recorded_inline_and_skipped() {
    let broken = Scripted::new("primary", ProviderOutcome::Failure("HTTP 502".into()));
    let backup = Scripted::new("backup", routes(700.0));
    let (o, monitor) = orchestrator(vec![broken.clone(), backup.clone()]);

    let answer = o.route(&request(false)).await.unwrap();
    assert_eq!(answer.source, "backup");
    assert_eq!(monitor.state("primary"), Some(ProviderState::Degraded));
    let warnings = monitor.alerts(&AlertFilter {
        engine: Some("primary".into()),
        severity: Some(AlertSeverity::Warning),
        ..AlertFilter::default()
    });
    assert_eq!(warnings.len(), 1);

    // Two more failing requests (distinct keys) take the primary down.
    for lat in [50.2, 50.3] {
        let mut r = request(false);
        r.end = at(lat, 4.0);
        o.route(&r).await.unwrap();
    }
    assert_eq!(monitor.state("primary"), Some(ProviderState::Down));
    assert_eq!(broken.calls(), 3);

    let mut r = request(false);
    r.end = at(50.4, 4.0);
    o.route(&r).await.unwrap();
    assert_eq!(broken.calls(), 3, "a down provider is not tried");
    assert_eq!(backup.calls(), 4);

    let csv = monitor.cost_csv();
    assert!(csv.contains(",primary,route,3,6144,"));
}

#[tokio::test]
async fn exhausted_chain_reports_the_last_diagnostic() {
    let (o, _) = orchestrator(vec![
        Scripted::new("first", ProviderOutcome::Timeout),
        Scripted::new("second", ProviderOutcome::Failure("HTTP 500".into())),
    ]);
    match o.route(&request(false)).await {
        Err(RouteError::NoRouteAvailable { last }) => {
            assert!(last.contains("second"), "{last}");
            assert!(last.contains("HTTP 500"), "{last}");
        }
        other => panic!("expected NoRouteAvailable, got {other:?}"),
    }
}

#[tokio::test]
async fn no_route_answer_falls_through_without_a_health_failure() {
    let (o, monitor) = orchestrator(vec![
        Scripted::new("first", ProviderOutcome::NoRoute("Impossible route".into())),
        Scripted::new("second", routes(500.0)),
    ]);
    let answer = o.route(&request(false)).await.unwrap();
    assert_eq!(answer.source, "second");
    assert_eq!(monitor.state("first"), Some(ProviderState::Up));
}

#[tokio::test]
async fn unroutable_request_stops_the_chain() {
    let snap = RouteError::SnapFailure {
        lat: 50.0,
        lon: 4.0,
        radius_m: 500.0,
    };
    let backup = Scripted::new("backup", routes(500.0));
    let (o, _) = orchestrator(vec![
        Scripted::new("local", ProviderOutcome::Unroutable(snap.clone())),
        backup.clone(),
    ]);
    assert_eq!(o.route(&request(false)).await, Err(snap));
    assert_eq!(backup.calls(), 0);
}

#[tokio::test]
async fn unroutable_request_stops_hazard_pooling_too() {
    let split = RouteError::Disconnected { from: 1, to: 5 };
    let backup = Scripted::new("backup", routes(500.0));
    let (o, _) = orchestrator(vec![
        Scripted::new("local", ProviderOutcome::Unroutable(split.clone())),
        backup.clone(),
    ]);
    assert_eq!(o.route(&request(true)).await, Err(split));
    assert_eq!(backup.calls(), 0);
}

#[tokio::test]
async fn empty_route_list_is_a_healthy_fall_through() {
    let empty = Scripted::new("empty", ProviderOutcome::Routes(Vec::new()));
    let (o, monitor) = orchestrator(vec![empty.clone(), Scripted::new("second", routes(500.0))]);
    for lat in [50.1, 50.2, 50.3] {
        let mut r = request(false);
        r.end = at(lat, 4.0);
        assert_eq!(o.route(&r).await.unwrap().source, "second");
    }
    assert_eq!(monitor.state("empty"), Some(ProviderState::Up));
    assert_eq!(empty.calls(), 3);
}

struct SlowSink;

impl AlertSink for SlowSink {
    fn deliver(&self, _alert: &Alert) {
        std::thread::sleep(Duration::from_secs(2));
    }
}

struct PanickingSink;

impl AlertSink for PanickingSink {
    fn deliver(&self, _alert: &Alert) {
        panic!("alert channel unavailable");
    }
}

#[tokio::test]
async fn alert_delivery_never_holds_up_routing() {
    let sinks: [Arc<dyn AlertSink>; 2] = [Arc::new(SlowSink), Arc::new(PanickingSink)];
    for sink in sinks {
        let monitor = Arc::new(HealthMonitor::new(MonitorConfig::default()).with_sink(sink));
        let o = RoutingOrchestrator::new(
            vec![
                Scripted::new("primary", ProviderOutcome::Failure("HTTP 502".into())),
                Scripted::new("backup", routes(700.0)),
            ],
            monitor.clone(),
            Arc::new(HazardHandle::new(HazardIndex::new(Vec::new()))),
            RouteCache::new(CacheConfig::default()),
            OrchestratorConfig::default(),
        );
        let answer = tokio::time::timeout(Duration::from_millis(500), o.route(&request(false)))
            .await
            .expect("routing waited on the alert sink")
            .unwrap();
        assert_eq!(answer.source, "backup");
        assert_eq!(monitor.alerts(&AlertFilter::default()).len(), 1);
    }
}

#[tokio::test]
async fn local_engine_is_not_billed() {
    let engine = Arc::new(EngineHandle::new(engine_for(chain())));
    let (o, monitor) = orchestrator(vec![Arc::new(LocalProvider::new("local", engine))]);
    let mut r = request(false);
    r.end = at(50.0 + 4.0 * KM_LAT, 4.0);
    assert_eq!(o.route(&r).await.unwrap().source, "local");
    assert!(!monitor.cost_csv().contains("local"));
}

#[tokio::test]
async fn slow_chain_hits_the_request_timeout() {
    let slow = Arc::new(Scripted {
        name: "slow",
        outcome: routes(600.0),
        delay: Duration::from_secs(10),
        calls: AtomicUsize::new(0),
    });
    let config = OrchestratorConfig {
        request_timeout: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    };
    let (o, monitor) = orchestrator_with(vec![slow], Vec::new(), config);
    assert_eq!(
        o.route(&request(false)).await,
        Err(RouteError::RequestTimeout { timeout_ms: 50 })
    );
    // The abandoned call never reached its bookkeeping.
    assert_eq!(monitor.status("slow").unwrap().checks_in_window, 0);
}

#[tokio::test]
async fn hazard_mode_pools_alternatives_across_providers() {
    let school = Hazard {
        lat: 50.05,
        lon: 4.0,
        category: HazardCategory::SchoolZone,
        description: String::new(),
    };
    let detour = ProviderOutcome::Routes(vec![CandidateRoute {
        distance_m: 14_000.0,
        duration_s: 800.0,
        geometry: vec![at(50.0, 4.0), at(50.05, 4.03), at(50.1, 4.0)],
    }]);
    let (o, _) = orchestrator_with(
        vec![Scripted::new("fast", routes(600.0)), Scripted::new("detour", detour)],
        vec![school],
        OrchestratorConfig::default(),
    );

    let ranked = o.route(&request(true)).await.unwrap();
    assert_eq!(ranked.routes.len(), 2);
    assert_eq!(ranked.source, "detour");
    assert_eq!(ranked.routes[0].hazard_count, 0);
    assert_eq!(ranked.routes[1].source, "fast");
    assert_eq!(
        ranked.routes[1].hazards_by_category.get(&HazardCategory::SchoolZone),
        Some(&1)
    );

    // With the category switched off the faster route wins again.
    let mut r = request(true);
    r.preferences.set_enabled(HazardCategory::SchoolZone, false);
    let ranked = o.route(&r).await.unwrap();
    assert_eq!(ranked.source, "fast");
}

#[tokio::test]
async fn local_engine_serves_covered_requests() {
    let engine = Arc::new(EngineHandle::new(engine_for(chain())));
    let external = Scripted::new("osrm", routes(900.0));
    let (o, _) = orchestrator(vec![
        Arc::new(LocalProvider::new("local", engine)),
        external.clone(),
    ]);

    let mut r = request(false);
    r.end = at(50.0 + 4.0 * KM_LAT, 4.0);
    let answer = o.route(&r).await.unwrap();
    assert_eq!(answer.source, "local");
    let best = &answer.routes[0];
    assert!((best.distance_km - 4.0).abs() < 1e-9);
    assert!((best.duration_minutes - 4.0).abs() < 1e-9);
    assert_eq!(best.geometry.len(), 5);
    assert_eq!(external.calls(), 0);

    // Outside the dataset's bounding box the external provider answers.
    let mut far = request(false);
    far.start = at(48.0, 2.0);
    far.end = at(48.1, 2.0);
    assert_eq!(o.route(&far).await.unwrap().source, "osrm");
    assert_eq!(external.calls(), 1);
}
