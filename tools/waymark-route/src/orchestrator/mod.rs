//! Provider selection, failover, hazard ranking and caching
//!
//! # Policy
//!
//! Providers are tried in registration order (the local engine first).
//! A provider is eligible when it covers both endpoints and the health
//! monitor does not report it down.
//!
//! - Hazard avoidance off: plain failover. The first provider that returns
//!   routes wins and its own ranking is kept.
//! - Hazard avoidance on: the leading provider is asked first; if it reports
//!   the request unroutable that error is returned as is. Otherwise the
//!   remaining providers are asked for alternatives concurrently, the pooled
//!   candidates are scored against the hazard snapshot and sorted by
//!   (penalty, duration).
//!
//! Every provider call is recorded with the monitor as soon as it returns,
//! so a request that is later abandoned still leaves consistent health and
//! usage counters.

pub mod cache;
pub mod osrm;
pub mod provider;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use waymark_common::{LatLon, RouteError};

use crate::engine::VehicleParams;
use crate::geo::BoundingBox;
use crate::hazard::index::has_hazards;
use crate::hazard::{HazardCategory, HazardHandle, HazardPreferences, HazardScore, RouteScorer};
use crate::health::{HealthMonitor, RequestType};

pub use cache::{CacheConfig, CacheStats, RouteCache, RouteCacheKey};
pub use osrm::OsrmProvider;
pub use provider::{CandidateRoute, LocalProvider, ProviderOutcome, ProviderReply, ProviderRequest, RouteProvider};

#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub start: LatLon,
    pub end: LatLon,
    pub vehicle: VehicleParams,
    pub hazard_avoidance: bool,
    pub preferences: HazardPreferences,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRoute {
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub geometry: Vec<LatLon>,
    pub hazard_penalty_seconds: f64,
    pub hazard_count: usize,
    pub hazards_by_category: BTreeMap<HazardCategory, usize>,
    pub source: String,
}

impl RankedRoute {
    fn new(candidate: CandidateRoute, source: &str, score: HazardScore) -> Self {
        Self {
            distance_km: candidate.distance_m / 1000.0,
            duration_minutes: candidate.duration_s / 60.0,
            geometry: candidate.geometry,
            hazard_penalty_seconds: score.penalty_seconds,
            hazard_count: score.hazard_count,
            hazards_by_category: score
                .by_category
                .into_iter()
                .map(|(c, s)| (c, s.count))
                .collect(),
            source: source.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRoutes {
    pub routes: Vec<RankedRoute>,
    /// Provider of the top-ranked route.
    pub source: String,
    pub cached: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// End-to-end budget for one request across the whole fallback chain.
    pub request_timeout: Duration,
    /// Padding around the candidate routes when fetching hazards (~11 km).
    pub hazard_buffer_deg: f64,
    pub coordinate_precision: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(45),
            hazard_buffer_deg: 0.1,
            coordinate_precision: 5,
        }
    }
}

pub struct RoutingOrchestrator {
    providers: Vec<Arc<dyn RouteProvider>>,
    monitor: Arc<HealthMonitor>,
    hazards: Arc<HazardHandle>,
    cache: RouteCache<RankedRoutes>,
    config: OrchestratorConfig,
}

impl RoutingOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn RouteProvider>>,
        monitor: Arc<HealthMonitor>,
        hazards: Arc<HazardHandle>,
        cache: RouteCache<RankedRoutes>,
        config: OrchestratorConfig,
    ) -> Self {
        for p in &providers {
            monitor.register(p.name());
        }
        info!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "routing orchestrator ready"
        );
        Self {
            providers,
            monitor,
            hazards,
            cache,
            config,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn RouteProvider>] {
        &self.providers
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn hazards(&self) -> &Arc<HazardHandle> {
        &self.hazards
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub async fn route(&self, request: &RouteRequest) -> Result<RankedRoutes, RouteError> {
        let key = RouteCacheKey::new(
            request.start,
            request.end,
            request.vehicle,
            request.hazard_avoidance,
            &request.preferences,
            self.config.coordinate_precision,
        );
        if let Some(mut hit) = self.cache.get(&key) {
            debug!(key = %key.digest(), "route cache hit");
            hit.cached = true;
            return Ok(hit);
        }

        let routes = tokio::time::timeout(self.config.request_timeout, self.compute(request))
            .await
            .map_err(|_| RouteError::RequestTimeout {
                timeout_ms: self.config.request_timeout.as_millis() as u64,
            })??;
        self.cache.insert(key, routes.clone());
        Ok(routes)
    }

    async fn compute(&self, request: &RouteRequest) -> Result<RankedRoutes, RouteError> {
        let eligible: Vec<Arc<dyn RouteProvider>> = self
            .providers
            .iter()
            .filter(|p| p.covers(request.start, request.end) && self.monitor.is_usable(p.name()))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(RouteError::NoRouteAvailable {
                last: "no healthy provider covers this request".to_string(),
            });
        }
        if request.hazard_avoidance {
            self.pooled(request, &eligible).await
        } else {
            self.failover(request, &eligible).await
        }
    }

    /// Calls one provider and records the outcome before returning it.
    ///
    /// An empty route list is reported as `NoRoute`, so health accounting
    /// and the fallback chain agree on it.
    async fn call(&self, provider: &dyn RouteProvider, request: &ProviderRequest) -> ProviderOutcome {
        let reply = provider.route(request).await;
        let name = provider.name();
        if provider.metered() {
            self.monitor.record_usage(name, RequestType::Route, reply.bytes);
        }
        let outcome = match reply.outcome {
            ProviderOutcome::Routes(routes) if routes.is_empty() => {
                ProviderOutcome::NoRoute("empty route list".to_string())
            }
            other => other,
        };
        if outcome.is_failure() {
            self.monitor.record_failure(name, &outcome.describe());
        } else {
            self.monitor.record_success(name);
        }
        outcome
    }

    async fn failover(
        &self,
        request: &RouteRequest,
        providers: &[Arc<dyn RouteProvider>],
    ) -> Result<RankedRoutes, RouteError> {
        let preq = provider_request(request, false);
        let mut last = None;
        for provider in providers {
            let name = provider.name();
            let error = match self.call(&**provider, &preq).await {
                ProviderOutcome::Routes(routes) if !routes.is_empty() => {
                    let routes = routes
                        .into_iter()
                        .map(|c| RankedRoute::new(c, name, HazardScore::default()))
                        .collect();
                    return Ok(RankedRoutes {
                        routes,
                        source: name.to_string(),
                        cached: false,
                    });
                }
                ProviderOutcome::Unroutable(e) => return Err(e),
                other => outcome_error(name, other),
            };
            warn!(provider = name, error = %error, "provider gave no route, trying next");
            last = Some(error);
        }
        Err(exhausted(last))
    }

    async fn pooled(
        &self,
        request: &RouteRequest,
        providers: &[Arc<dyn RouteProvider>],
    ) -> Result<RankedRoutes, RouteError> {
        let preq = provider_request(request, true);
        let Some((lead, rest)) = providers.split_first() else {
            return Err(exhausted(None));
        };

        // The leading provider decides whether the request is routable at all.
        let lead_outcome = self.call(&**lead, &preq).await;
        if let ProviderOutcome::Unroutable(e) = lead_outcome {
            return Err(e);
        }
        let calls = rest.iter().map(|p| {
            let preq = &preq;
            async move { (p.name(), self.call(&**p, preq).await) }
        });
        let mut outcomes = vec![(lead.name(), lead_outcome)];
        outcomes.extend(join_all(calls).await);

        let mut candidates: Vec<(&str, CandidateRoute)> = Vec::new();
        let mut last = None;
        for (name, outcome) in outcomes {
            match outcome {
                ProviderOutcome::Routes(routes) if !routes.is_empty() => {
                    candidates.extend(routes.into_iter().map(|c| (name, c)));
                }
                ProviderOutcome::Unroutable(e) => return Err(e),
                other => {
                    let error = outcome_error(name, other);
                    warn!(provider = name, error = %error, "provider contributed no candidates");
                    last = Some(error);
                }
            }
        }
        if candidates.is_empty() {
            return Err(exhausted(last));
        }

        let snapshot = self.hazards.current();
        let bbox = BoundingBox::from_points(
            candidates
                .iter()
                .flat_map(|(_, c)| c.geometry.iter().copied())
                .chain([request.start, request.end]),
        )
        .map(|b| b.expand(self.config.hazard_buffer_deg));
        let hazards = match bbox {
            Some(bbox) => snapshot.query(&bbox, request.preferences.enabled_categories()),
            None => Default::default(),
        };

        let mut ranked: Vec<RankedRoute> = if has_hazards(&hazards) {
            let scorer = RouteScorer::new(&hazards, &request.preferences);
            candidates
                .into_par_iter()
                .map(|(name, c)| {
                    let score = scorer.score(&c.geometry);
                    RankedRoute::new(c, name, score)
                })
                .collect()
        } else {
            candidates
                .into_iter()
                .map(|(name, c)| RankedRoute::new(c, name, HazardScore::default()))
                .collect()
        };
        ranked.sort_by(|a, b| {
            a.hazard_penalty_seconds
                .total_cmp(&b.hazard_penalty_seconds)
                .then(a.duration_minutes.total_cmp(&b.duration_minutes))
        });

        let source = ranked
            .first()
            .map(|r| r.source.clone())
            .unwrap_or_default();
        debug!(
            candidates = ranked.len(),
            hazards = hazards.values().map(Vec::len).sum::<usize>(),
            source = %source,
            "ranked candidates by hazard penalty"
        );
        Ok(RankedRoutes {
            routes: ranked,
            source,
            cached: false,
        })
    }
}

fn provider_request(request: &RouteRequest, alternatives: bool) -> ProviderRequest {
    ProviderRequest {
        start: request.start,
        end: request.end,
        vehicle: request.vehicle,
        alternatives,
    }
}

fn outcome_error(provider: &str, outcome: ProviderOutcome) -> RouteError {
    let provider = provider.to_string();
    match outcome {
        ProviderOutcome::Timeout => RouteError::ProviderTimeout { provider },
        ProviderOutcome::Routes(_) => RouteError::ProviderError {
            provider,
            reason: "empty route list".to_string(),
        },
        ProviderOutcome::NoRoute(reason) | ProviderOutcome::Failure(reason) => {
            RouteError::ProviderError { provider, reason }
        }
        ProviderOutcome::Unroutable(e) => e,
    }
}

fn exhausted(last: Option<RouteError>) -> RouteError {
    RouteError::NoRouteAvailable {
        last: last.map_or_else(|| "no provider answered".to_string(), |e| e.to_string()),
    }
}
