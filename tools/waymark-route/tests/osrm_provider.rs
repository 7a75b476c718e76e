//! OSRM-compatible provider against a mock HTTP backend

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use waymark_common::LatLon;
use waymark_route::config::ProviderConfig;
use waymark_route::orchestrator::{OsrmProvider, ProviderOutcome, ProviderRequest, RouteProvider};
use waymark_route::{RoutingMode, VehicleParams, VehicleType};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(base_url: &str, timeout_secs: u64) -> ProviderConfig {
    ProviderConfig {
        name: "osrm-test".into(),
        base_url: base_url.into(),
        profile: "driving".into(),
        vehicle_profiles: BTreeMap::from([("truck".to_string(), "hgv".to_string())]),
        timeout_secs,
        cost_per_request_usd: 0.0,
        cost_per_gb_usd: 0.0,
        probe_from: None,
        probe_to: None,
    }
}

fn request(vehicle_type: VehicleType, routing_mode: RoutingMode) -> ProviderRequest {
    ProviderRequest {
        start: LatLon::new(50.85, 4.35).unwrap(),
        end: LatLon::new(50.86, 4.40).unwrap(),
        vehicle: VehicleParams {
            vehicle_type,
            routing_mode,
        },
        alternatives: false,
    }
}

fn osrm_route(distance: f64, duration: f64) -> serde_json::Value {
    json!({
        "distance": distance,
        "duration": duration,
        "weight": duration,
        "geometry": {"type": "LineString", "coordinates": [[4.35, 50.85], [4.37, 50.855], [4.40, 50.86]]},
        "legs": []
    })
}

#[tokio::test]
async fn parses_routes_and_counts_bytes() {
    let server = MockServer::start().await;
    let body = json!({"code": "Ok", "routes": [osrm_route(5100.0, 420.0)], "waypoints": []});
    Mock::given(method("GET"))
        .and(path("/route/v1/driving/4.350000,50.850000;4.400000,50.860000"))
        .and(query_param("geometries", "geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OsrmProvider::new(config(&server.uri(), 5)).unwrap();
    let reply = provider
        .route(&request(VehicleType::Car, RoutingMode::Fastest))
        .await;
    assert_eq!(reply.bytes, serde_json::to_vec(&body).unwrap().len() as u64);
    match reply.outcome {
        ProviderOutcome::Routes(routes) => {
            assert_eq!(routes.len(), 1);
            assert_eq!(routes[0].distance_m, 5100.0);
            assert_eq!(routes[0].geometry.len(), 3);
            assert_eq!(routes[0].geometry[0], LatLon { lat: 50.85, lon: 4.35 });
        }
        other => panic!("expected routes, got {other:?}"),
    }
}

#[tokio::test]
async fn shortest_mode_reorders_alternatives_by_distance() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/route/v1/hgv/4.350000,50.850000;4.400000,50.860000"))
        .and(query_param("alternatives", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "Ok",
            "routes": [osrm_route(6000.0, 400.0), osrm_route(5000.0, 450.0)]
        })))
        .mount(&server)
        .await;

    let provider = OsrmProvider::new(config(&server.uri(), 5)).unwrap();
    let reply = provider
        .route(&request(VehicleType::Truck, RoutingMode::Shortest))
        .await;
    let ProviderOutcome::Routes(routes) = reply.outcome else {
        panic!("expected routes");
    };
    assert_eq!(routes[0].distance_m, 5000.0);
    assert_eq!(routes[1].distance_m, 6000.0);
}

#[tokio::test]
async fn no_route_code_is_not_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "NoRoute",
            "message": "Impossible route between points"
        })))
        .mount(&server)
        .await;

    let provider = OsrmProvider::new(config(&server.uri(), 5)).unwrap();
    let reply = provider
        .route(&request(VehicleType::Car, RoutingMode::Fastest))
        .await;
    assert!(!reply.outcome.is_failure());
    assert!(matches!(reply.outcome, ProviderOutcome::NoRoute(ref m) if m.contains("Impossible")));
}

#[tokio::test]
async fn server_errors_and_timeouts_are_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/route/v1/driving/4.350000,50.850000;4.400000,50.860000"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;
    let provider = OsrmProvider::new(config(&server.uri(), 5)).unwrap();
    let reply = provider
        .route(&request(VehicleType::Car, RoutingMode::Fastest))
        .await;
    assert!(matches!(reply.outcome, ProviderOutcome::Failure(ref m) if m == "HTTP 503"));

    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": "Ok", "routes": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&slow)
        .await;
    let provider = OsrmProvider::new(config(&slow.uri(), 1)).unwrap();
    let reply = provider
        .route(&request(VehicleType::Car, RoutingMode::Fastest))
        .await;
    assert!(matches!(reply.outcome, ProviderOutcome::Timeout));
}

#[tokio::test]
async fn probe_without_route_checks_the_root() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let provider = OsrmProvider::new(config(&server.uri(), 5)).unwrap();
    assert!(!provider.probe().await.outcome.is_failure());

    let down = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&down)
        .await;
    let provider = OsrmProvider::new(config(&down.uri(), 5)).unwrap();
    assert!(provider.probe().await.outcome.is_failure());
}

#[tokio::test]
async fn probe_routes_the_configured_pair() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/route/v1/driving/4.000000,50.000000;4.100000,50.100000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "Ok",
            "routes": [osrm_route(100.0, 10.0)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server.uri(), 5);
    cfg.probe_from = Some("50.0,4.0".into());
    cfg.probe_to = Some("50.1,4.1".into());
    let provider = OsrmProvider::new(cfg).unwrap();
    let reply = provider.probe().await;
    assert!(matches!(reply.outcome, ProviderOutcome::Routes(_)));
    assert!(reply.bytes > 0);
}
