//! Route providers: the local hierarchy engine and external backends

use std::sync::Arc;

use async_trait::async_trait;
use waymark_common::{LatLon, RouteError};

use crate::engine::{EngineHandle, VehicleParams};

/// One candidate route as returned by a provider, in provider order.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRoute {
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Vec<LatLon>,
}

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub start: LatLon,
    pub end: LatLon,
    pub vehicle: VehicleParams,
    /// Ask for alternatives as well as the primary route.
    pub alternatives: bool,
}

/// How a provider call ended.
#[derive(Debug, Clone)]
pub enum ProviderOutcome {
    Routes(Vec<CandidateRoute>),
    /// The provider answered but has no route for this pair.
    NoRoute(String),
    Timeout,
    Failure(String),
    /// The request itself cannot be routed; no other provider is tried.
    Unroutable(RouteError),
}

impl ProviderOutcome {
    /// Whether the outcome counts as a failed health check.
    pub fn is_failure(&self) -> bool {
        matches!(self, ProviderOutcome::Timeout | ProviderOutcome::Failure(_))
    }

    pub fn describe(&self) -> String {
        match self {
            ProviderOutcome::Routes(r) => format!("{} routes", r.len()),
            ProviderOutcome::NoRoute(reason) => format!("no route: {reason}"),
            ProviderOutcome::Timeout => "timed out".to_string(),
            ProviderOutcome::Failure(reason) => reason.clone(),
            ProviderOutcome::Unroutable(e) => e.to_string(),
        }
    }
}

/// Outcome plus the bytes exchanged, for bandwidth accounting.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub outcome: ProviderOutcome,
    pub bytes: u64,
}

impl ProviderReply {
    pub fn local(outcome: ProviderOutcome) -> Self {
        Self { outcome, bytes: 0 }
    }
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider can answer for both points at all.
    fn covers(&self, _start: LatLon, _end: LatLon) -> bool {
        true
    }

    /// Whether calls cost money and show up in usage accounting.
    fn metered(&self) -> bool {
        true
    }

    async fn route(&self, request: &ProviderRequest) -> ProviderReply;

    /// Cheap liveness check used by the background prober.
    async fn probe(&self) -> ProviderReply;
}

/// Provider backed by the in-process hierarchy engine.
pub struct LocalProvider {
    name: String,
    engine: Arc<EngineHandle>,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>, engine: Arc<EngineHandle>) -> Self {
        Self {
            name: name.into(),
            engine,
        }
    }
}

#[async_trait]
impl RouteProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn covers(&self, start: LatLon, end: LatLon) -> bool {
        self.engine.current().covers(start, end)
    }

    fn metered(&self) -> bool {
        false
    }

    async fn route(&self, request: &ProviderRequest) -> ProviderReply {
        let engine = self.engine.current();
        let (start, end, vehicle) = (request.start, request.end, request.vehicle);
        let joined = tokio::task::spawn_blocking(move || engine.route(start, end, vehicle)).await;
        let outcome = match joined {
            Ok(Ok(path)) => ProviderOutcome::Routes(vec![CandidateRoute {
                distance_m: path.distance_m,
                duration_s: path.duration_s,
                geometry: path.geometry,
            }]),
            Ok(Err(e)) if e.is_terminal() => ProviderOutcome::Unroutable(e),
            Ok(Err(e)) => ProviderOutcome::Failure(e.to_string()),
            Err(e) => ProviderOutcome::Failure(format!("query task failed: {e}")),
        };
        ProviderReply::local(outcome)
    }

    async fn probe(&self) -> ProviderReply {
        let engine = self.engine.current();
        let outcome = match engine.graph().nodes().first().map(|n| n.id) {
            Some(id) => match engine.route_nodes(id, id, VehicleParams::default()) {
                Ok(_) => ProviderOutcome::Routes(Vec::new()),
                Err(e) => ProviderOutcome::Failure(format!("self-check failed: {e}")),
            },
            None => ProviderOutcome::Failure("engine has no nodes".to_string()),
        };
        ProviderReply::local(outcome)
    }
}
