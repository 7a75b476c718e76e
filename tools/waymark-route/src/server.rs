//! HTTP API over the routing orchestrator and the health monitor

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use waymark_common::{LatLon, RouteError};

use crate::engine::{RoutingMode, VehicleParams, VehicleType};
use crate::hazard::HazardCategory;
use crate::health::AlertFilter;
use crate::orchestrator::{RankedRoute, RankedRoutes, RouteRequest};
use crate::state::ServiceState;

#[derive(OpenApi)]
#[openapi(
    paths(
        route,
        health,
        providers,
        alerts,
        resolve_alert,
        resolve_engine_alerts,
        costs,
        costs_csv,
        reload
    ),
    components(schemas(RouteResponse, RouteDto, ErrorResponse)),
    info(
        title = "Waymark Route API",
        description = "Hazard-aware routing with provider failover"
    )
)]
struct ApiDoc;

pub fn build_router(state: Arc<ServiceState>) -> Router {
    let limit = state.config.server.concurrency_limit.max(1);
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/route", get(route))
        .route("/health", get(health))
        .route("/monitoring/providers", get(providers))
        .route("/monitoring/alerts", get(alerts))
        .route("/monitoring/alerts/resolve", post(resolve_engine_alerts))
        .route("/monitoring/alerts/{id}/resolve", post(resolve_alert))
        .route("/monitoring/costs", get(costs))
        .route("/monitoring/costs.csv", get(costs_csv))
        .route("/admin/reload", post(reload))
        .layer(GlobalConcurrencyLimitLayer::new(limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until `token` is cancelled, then drains in-flight requests.
pub async fn serve(state: Arc<ServiceState>, bind: &str, token: CancellationToken) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %listener.local_addr()?, "listening; docs at /swagger-ui");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP server failed")?;
    Ok(())
}

// ============ Errors ============

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(RouteError);

impl From<RouteError> for ApiError {
    fn from(e: RouteError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            RouteError::SnapFailure { .. }
            | RouteError::InvalidCoordinate(_)
            | RouteError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RouteError::Disconnected { .. } | RouteError::NoPath { .. } => StatusCode::NOT_FOUND,
            RouteError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RouteError::NoRouteAvailable { .. }
            | RouteError::ProviderTimeout { .. }
            | RouteError::ProviderError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (self.status(), body).into_response()
    }
}

// ============ Route Endpoint ============

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RouteParams {
    /// Start as `lat,lon`
    #[param(example = "50.8503,4.3517")]
    start: String,
    /// End as `lat,lon`
    #[param(example = "51.2194,4.4025")]
    end: String,
    /// car, truck or motorcycle
    vehicle_type: Option<String>,
    /// fastest or shortest
    routing_mode: Option<String>,
    #[serde(default)]
    enable_hazard_avoidance: bool,
    avoid_traffic_enforcement: Option<bool>,
    avoid_red_light_camera: Option<bool>,
    avoid_roadworks: Option<bool>,
    avoid_railway_crossing: Option<bool>,
    avoid_school_zone: Option<bool>,
    avoid_other: Option<bool>,
}

impl RouteParams {
    fn avoid_flags(&self) -> [(HazardCategory, Option<bool>); 6] {
        [
            (HazardCategory::TrafficEnforcement, self.avoid_traffic_enforcement),
            (HazardCategory::RedLightCamera, self.avoid_red_light_camera),
            (HazardCategory::Roadworks, self.avoid_roadworks),
            (HazardCategory::RailwayCrossing, self.avoid_railway_crossing),
            (HazardCategory::SchoolZone, self.avoid_school_zone),
            (HazardCategory::Other, self.avoid_other),
        ]
    }

    fn into_request(self, state: &ServiceState) -> Result<RouteRequest, RouteError> {
        let vehicle = VehicleParams {
            vehicle_type: match &self.vehicle_type {
                Some(v) => v.parse()?,
                None => VehicleType::default(),
            },
            routing_mode: match &self.routing_mode {
                Some(m) => m.parse()?,
                None => RoutingMode::default(),
            },
        };
        let mut preferences = state.default_preferences.clone();
        for (category, avoid) in self.avoid_flags() {
            if let Some(avoid) = avoid {
                preferences.set_enabled(category, avoid);
            }
        }
        Ok(RouteRequest {
            start: self.start.parse::<LatLon>()?,
            end: self.end.parse::<LatLon>()?,
            vehicle,
            hazard_avoidance: self.enable_hazard_avoidance,
            preferences,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteDto {
    #[schema(example = 28.9)]
    pub distance_km: f64,
    #[schema(example = 32.2)]
    pub duration_minutes: f64,
    /// `[lat, lon]` pairs along the route
    pub geometry: Vec<[f64; 2]>,
    pub hazard_penalty_seconds: f64,
    pub hazard_count: usize,
    pub hazards_by_category: BTreeMap<String, usize>,
    pub source: String,
}

impl From<RankedRoute> for RouteDto {
    fn from(r: RankedRoute) -> Self {
        Self {
            distance_km: r.distance_km,
            duration_minutes: r.duration_minutes,
            geometry: r.geometry.iter().map(|p| [p.lat, p.lon]).collect(),
            hazard_penalty_seconds: r.hazard_penalty_seconds,
            hazard_count: r.hazard_count,
            hazards_by_category: r
                .hazards_by_category
                .into_iter()
                .map(|(c, n)| (c.as_str().to_string(), n))
                .collect(),
            source: r.source,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteResponse {
    pub routes: Vec<RouteDto>,
    /// Provider of the first route
    pub source: String,
    pub cached: bool,
}

impl From<RankedRoutes> for RouteResponse {
    fn from(r: RankedRoutes) -> Self {
        Self {
            routes: r.routes.into_iter().map(RouteDto::from).collect(),
            source: r.source,
            cached: r.cached,
        }
    }
}

/// Route between two points, optionally ranked by hazard exposure
#[utoipa::path(
    get,
    path = "/route",
    params(RouteParams),
    responses(
        (status = 200, description = "Routes found", body = RouteResponse),
        (status = 400, description = "Bad coordinates or no nearby road", body = ErrorResponse),
        (status = 404, description = "Endpoints are not connected", body = ErrorResponse),
        (status = 503, description = "Every provider failed", body = ErrorResponse),
        (status = 504, description = "Request timed out", body = ErrorResponse),
    ),
    tag = "routing"
)]
async fn route(
    State(state): State<Arc<ServiceState>>,
    Query(params): Query<RouteParams>,
) -> Result<Json<RouteResponse>, ApiError> {
    let request = params.into_request(&state)?;
    let routes = state.orchestrator.route(&request).await?;
    Ok(Json(routes.into()))
}

// ============ Health & Monitoring ============

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")), tag = "monitoring")]
async fn health(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    let engine = state.engine.current();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "dataset": state.config.engine.dataset_version,
        "nodes": engine.graph().n_nodes(),
        "shortcuts": engine.index().n_shortcuts(),
        "hazards": state.hazards.current().len(),
        "cache": state.orchestrator.cache_stats(),
    }))
}

#[utoipa::path(get, path = "/monitoring/providers", responses((status = 200, description = "Per-provider status")), tag = "monitoring")]
async fn providers(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    Json(state.monitor.statuses())
}

#[utoipa::path(
    get,
    path = "/monitoring/alerts",
    params(
        ("engine" = Option<String>, Query, description = "Provider name"),
        ("severity" = Option<String>, Query, description = "info, warning or critical"),
        ("resolved" = Option<bool>, Query, description = "Filter on resolution"),
        ("limit" = Option<usize>, Query, description = "Newest first, at most this many"),
    ),
    responses((status = 200, description = "Matching alerts")),
    tag = "monitoring"
)]
async fn alerts(
    State(state): State<Arc<ServiceState>>,
    Query(filter): Query<AlertFilter>,
) -> impl IntoResponse {
    Json(state.monitor.alerts(&filter))
}

#[utoipa::path(
    post,
    path = "/monitoring/alerts/{id}/resolve",
    params(("id" = u64, Path, description = "Alert id")),
    responses(
        (status = 200, description = "Alert resolved"),
        (status = 404, description = "No open alert with this id", body = ErrorResponse),
    ),
    tag = "monitoring"
)]
async fn resolve_alert(State(state): State<Arc<ServiceState>>, Path(id): Path<u64>) -> Response {
    if state.monitor.resolve_alert(id) {
        Json(serde_json::json!({ "resolved": 1 })).into_response()
    } else {
        let body = Json(ErrorResponse {
            error: format!("no open alert {id}"),
        });
        (StatusCode::NOT_FOUND, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct EngineParam {
    engine: String,
}

#[utoipa::path(
    post,
    path = "/monitoring/alerts/resolve",
    params(("engine" = String, Query, description = "Provider name")),
    responses((status = 200, description = "Number of alerts resolved")),
    tag = "monitoring"
)]
async fn resolve_engine_alerts(
    State(state): State<Arc<ServiceState>>,
    Query(param): Query<EngineParam>,
) -> impl IntoResponse {
    let resolved = state.monitor.resolve_alerts_for(&param.engine);
    Json(serde_json::json!({ "resolved": resolved }))
}

#[derive(Debug, Deserialize)]
struct DaysParam {
    days: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/monitoring/costs",
    params(("days" = Option<u32>, Query, description = "History length, default 30")),
    responses((status = 200, description = "History, projection, spike and forecasts")),
    tag = "monitoring"
)]
async fn costs(
    State(state): State<Arc<ServiceState>>,
    Query(param): Query<DaysParam>,
) -> impl IntoResponse {
    Json(state.monitor.cost_report(param.days.unwrap_or(30).clamp(1, 366)))
}

#[utoipa::path(
    get,
    path = "/monitoring/costs.csv",
    responses((status = 200, description = "Usage rows as CSV")),
    tag = "monitoring"
)]
async fn costs_csv(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        state.monitor.cost_csv(),
    )
}

// ============ Admin ============

/// Reload graph and index from disk and swap them in
#[utoipa::path(
    post,
    path = "/admin/reload",
    responses(
        (status = 200, description = "New engine snapshot in service"),
        (status = 500, description = "Reload failed; the previous snapshot stays", body = ErrorResponse),
    ),
    tag = "admin"
)]
async fn reload(State(state): State<Arc<ServiceState>>) -> Response {
    let reloaded = tokio::task::spawn_blocking(move || state.reload_engine()).await;
    let error = match reloaded {
        Ok(Ok(engine)) => {
            return Json(serde_json::json!({
                "nodes": engine.graph().n_nodes(),
                "shortcuts": engine.index().n_shortcuts(),
            }))
            .into_response();
        }
        Ok(Err(e)) => e.to_string(),
        Err(e) => format!("reload task failed: {e}"),
    };
    warn!(error = %error, "engine reload failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error })).into_response()
}
