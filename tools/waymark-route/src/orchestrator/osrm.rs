//! External OSRM-compatible HTTP routing backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use waymark_common::{Error, LatLon, Result};

use super::provider::{CandidateRoute, ProviderOutcome, ProviderReply, ProviderRequest, RouteProvider};
use crate::config::ProviderConfig;
use crate::engine::RoutingMode;

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: OsrmGeometry,
}

/// GeoJSON line string, coordinates in `[lon, lat]` order.
#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

pub struct OsrmProvider {
    config: ProviderConfig,
    client: Client,
    probe_pair: Option<(LatLon, LatLon)>,
}

impl OsrmProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("waymark-route/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("provider '{}': {e}", config.name)))?;
        let probe_pair = config.probe_pair()?;
        Ok(Self {
            config,
            client,
            probe_pair,
        })
    }

    fn route_url(&self, request: &ProviderRequest) -> String {
        let alternatives =
            request.alternatives || request.vehicle.routing_mode == RoutingMode::Shortest;
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?alternatives={}&overview=full&geometries=geojson",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile_for(request.vehicle.vehicle_type),
            request.start.lon,
            request.start.lat,
            request.end.lon,
            request.end.lat,
            alternatives,
        )
    }

    async fn fetch(&self, url: &str) -> ProviderReply {
        debug!(provider = %self.config.name, url, "requesting route");
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ProviderReply::local(transport_outcome(e)),
        };
        let status = response.status();
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return ProviderReply::local(transport_outcome(e)),
        };
        let bytes = body.len() as u64;

        let outcome = match serde_json::from_slice::<OsrmResponse>(&body) {
            Ok(parsed) if parsed.code == "Ok" => ProviderOutcome::Routes(
                parsed.routes.into_iter().map(OsrmRoute::into_candidate).collect(),
            ),
            Ok(parsed) if matches!(parsed.code.as_str(), "NoRoute" | "NoSegment") => {
                ProviderOutcome::NoRoute(parsed.message.unwrap_or(parsed.code))
            }
            Ok(parsed) => ProviderOutcome::Failure(format!(
                "HTTP {}: {} {}",
                status.as_u16(),
                parsed.code,
                parsed.message.unwrap_or_default()
            )),
            Err(_) if !status.is_success() => ProviderOutcome::Failure(format!("HTTP {}", status.as_u16())),
            Err(e) => ProviderOutcome::Failure(format!("malformed response: {e}")),
        };
        ProviderReply { outcome, bytes }
    }
}

impl OsrmRoute {
    fn into_candidate(self) -> CandidateRoute {
        CandidateRoute {
            distance_m: self.distance,
            duration_s: self.duration,
            geometry: self
                .geometry
                .coordinates
                .into_iter()
                .map(|[lon, lat]| LatLon { lat, lon })
                .collect(),
        }
    }
}

fn transport_outcome(e: reqwest::Error) -> ProviderOutcome {
    if e.is_timeout() {
        ProviderOutcome::Timeout
    } else {
        ProviderOutcome::Failure(e.to_string())
    }
}

#[async_trait]
impl RouteProvider for OsrmProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn route(&self, request: &ProviderRequest) -> ProviderReply {
        let mut reply = self.fetch(&self.route_url(request)).await;
        if request.vehicle.routing_mode == RoutingMode::Shortest {
            if let ProviderOutcome::Routes(routes) = &mut reply.outcome {
                routes.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
            }
        }
        reply
    }

    async fn probe(&self) -> ProviderReply {
        if let Some((start, end)) = self.probe_pair {
            let request = ProviderRequest {
                start,
                end,
                vehicle: Default::default(),
                alternatives: false,
            };
            return self.fetch(&self.route_url(&request)).await;
        }

        // Without a probe route any non-5xx answer from the root counts as alive.
        match self.client.get(&self.config.base_url).send().await {
            Ok(r) if r.status().is_server_error() || r.status() == StatusCode::TOO_MANY_REQUESTS => {
                ProviderReply::local(ProviderOutcome::Failure(format!("HTTP {}", r.status().as_u16())))
            }
            Ok(r) => ProviderReply {
                bytes: r.content_length().unwrap_or(0),
                outcome: ProviderOutcome::Routes(Vec::new()),
            },
            Err(e) => ProviderReply::local(transport_outcome(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{VehicleParams, VehicleType};

    fn provider(base_url: &str) -> OsrmProvider {
        OsrmProvider::new(ProviderConfig {
            name: "osrm".into(),
            base_url: base_url.into(),
            profile: "driving".into(),
            vehicle_profiles: [("truck".to_string(), "hgv".to_string())].into(),
            timeout_secs: 5,
            cost_per_request_usd: 0.0,
            cost_per_gb_usd: 0.0,
            probe_from: None,
            probe_to: None,
        })
        .unwrap()
    }

    #[test]
    fn url_uses_lon_lat_order_and_vehicle_profile() {
        let p = provider("http://osrm:5000/");
        let request = ProviderRequest {
            start: LatLon::new(50.85, 4.35).unwrap(),
            end: LatLon::new(50.86, 4.40).unwrap(),
            vehicle: VehicleParams {
                vehicle_type: VehicleType::Truck,
                routing_mode: RoutingMode::Fastest,
            },
            alternatives: false,
        };
        assert_eq!(
            p.route_url(&request),
            "http://osrm:5000/route/v1/hgv/4.350000,50.850000;4.400000,50.860000\
             ?alternatives=false&overview=full&geometries=geojson"
        );
    }

    #[test]
    fn shortest_mode_asks_for_alternatives() {
        let p = provider("http://osrm:5000");
        let request = ProviderRequest {
            start: LatLon::new(1.0, 2.0).unwrap(),
            end: LatLon::new(3.0, 4.0).unwrap(),
            vehicle: VehicleParams {
                vehicle_type: VehicleType::Car,
                routing_mode: RoutingMode::Shortest,
            },
            alternatives: false,
        };
        let url = p.route_url(&request);
        assert!(url.contains("/driving/"));
        assert!(url.contains("alternatives=true"));
    }

    #[test]
    fn geometry_is_flipped_to_lat_lon() {
        let route: OsrmRoute = serde_json::from_str(
            r#"{"distance": 1200.5, "duration": 95.0,
                "geometry": {"type": "LineString", "coordinates": [[4.35, 50.85], [4.36, 50.86]]}}"#,
        )
        .unwrap();
        let c = route.into_candidate();
        assert_eq!(c.geometry[0], LatLon { lat: 50.85, lon: 4.35 });
        assert_eq!(c.geometry.len(), 2);
        assert_eq!(c.distance_m, 1200.5);
    }
}
