//! HTTP API over a service loaded from files on disk

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use serde_json::Value;
use tower::ServiceExt;
use waymark_route::config::ServiceConfig;
use waymark_route::formats::{graph_file, index_file};
use waymark_route::server::build_router;
use waymark_route::{BuilderConfig, GraphStore, HierarchyBuilder, ServiceState, VehicleParams};

/// Chain A..E plus a separate two-node road 0.02 deg east. `extended`
/// adds F one kilometre north of E.
fn network(extended: bool) -> GraphStore {
    let (mut nodes, mut edges) = chain_tables();
    nodes.push(node(10, 50.0, 4.02));
    nodes.push(node(11, 50.01, 4.02));
    edges.extend(two_way(10, 11, 1100.0, 50.0));
    if extended {
        nodes.push(node(6, 50.0 + 5.0 * KM_LAT, 4.0));
        edges.extend(two_way(5, 6, 1000.0, 60.0));
    }
    GraphStore::new(nodes, edges).unwrap()
}

fn write_dataset(dir: &tempfile::TempDir, graph: &GraphStore) {
    let (index, _) = HierarchyBuilder::build(graph, BuilderConfig::default()).unwrap();
    graph_file::write(&dir.path().join("graph.wgr"), graph).unwrap();
    index_file::write(&dir.path().join("index.wch"), &index, graph).unwrap();
}

/// Service over `network(false)` with one speed camera on C.
fn service(dir: &tempfile::TempDir) -> Arc<ServiceState> {
    write_dataset(dir, &network(false));
    let hazards_path = dir.path().join("hazards.json");
    std::fs::write(
        &hazards_path,
        format!(
            r#"[{{"lat": {}, "lon": 4.0, "category": "speed_camera", "description": "C"}}]"#,
            50.0 + 2.0 * KM_LAT
        ),
    )
    .unwrap();

    let mut config = ServiceConfig::default();
    config.engine.graph_path = dir.path().join("graph.wgr");
    config.engine.index_path = dir.path().join("index.wch");
    config.hazards.path = Some(hazards_path);
    Arc::new(ServiceState::load(config).unwrap())
}

async fn get(state: &Arc<ServiceState>, uri: &str) -> (StatusCode, Value) {
    call(state, "GET", uri).await
}

async fn call(state: &Arc<ServiceState>, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn e_coord() -> String {
    format!("{},4.0", 50.0 + 4.0 * KM_LAT)
}

#[tokio::test]
async fn route_endpoint_serves_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let state = service(&dir);
    let uri = format!("/route?start=50.0,4.0&end={}", e_coord());

    let (status, body) = get(&state, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "local");
    assert_eq!(body["cached"], false);
    let route = &body["routes"][0];
    assert!((route["distance_km"].as_f64().unwrap() - 4.0).abs() < 1e-9);
    assert!((route["duration_minutes"].as_f64().unwrap() - 4.0).abs() < 1e-9);
    assert_eq!(route["geometry"].as_array().unwrap().len(), 5);
    assert_eq!(route["hazard_penalty_seconds"], 0.0);

    let (_, again) = get(&state, &uri).await;
    assert_eq!(again["cached"], true);
}

#[tokio::test]
async fn hazard_avoidance_scores_and_respects_flags() {
    let dir = tempfile::tempdir().unwrap();
    let state = service(&dir);
    let base = format!("/route?start=50.0,4.0&end={}&enable_hazard_avoidance=true", e_coord());

    let (status, body) = get(&state, &base).await;
    assert_eq!(status, StatusCode::OK);
    let route = &body["routes"][0];
    assert_eq!(route["hazard_count"], 1);
    assert_eq!(route["hazards_by_category"]["traffic_enforcement"], 1);
    assert!((route["hazard_penalty_seconds"].as_f64().unwrap() - 900.0).abs() < 1e-6);

    let (_, body) = get(&state, &format!("{base}&avoid_traffic_enforcement=false")).await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["routes"][0]["hazard_count"], 0);
}

#[tokio::test]
async fn route_errors_map_to_status_codes() {
    let dir = tempfile::tempdir().unwrap();
    let state = service(&dir);

    let (status, body) = get(&state, "/route?start=abc&end=50.0,4.0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("coordinate"));

    let (status, _) = get(&state, "/route?start=50.0,4.0&end=50.01,4.0&vehicle_type=boat").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Inside the coverage box but kilometres from any road.
    let (status, _) = get(&state, "/route?start=50.03,4.045&end=50.0,4.0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&state, "/route?start=50.0,4.0&end=50.01,4.02").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("different connected components"));

    // Outside the dataset and no external provider configured.
    let (status, _) = get(&state, "/route?start=40.0,2.0&end=40.1,2.0").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn monitoring_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let state = service(&dir);

    let (status, health) = get(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["nodes"], 7);
    assert_eq!(health["hazards"], 1);

    let (_, providers) = get(&state, "/monitoring/providers").await;
    assert_eq!(providers[0]["name"], "local");
    assert_eq!(providers[0]["state"], "up");

    let (status, alerts) = get(&state, "/monitoring/alerts?severity=critical").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alerts.as_array().unwrap().len(), 0);

    let (status, _) = call(&state, "POST", "/monitoring/alerts/99/resolve").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = call(&state, "POST", "/monitoring/alerts/resolve?engine=local").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"], 0);

    let (status, costs) = get(&state, "/monitoring/costs?days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert!(costs["forecast_30d"]["days"] == 30);

    let request = Request::builder()
        .uri("/monitoring/costs.csv")
        .body(Body::empty())
        .unwrap();
    let response = build_router(state.clone()).oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&bytes)
        .starts_with("date,provider,request_type,requests,bytes,cost_usd"));
}

#[tokio::test]
async fn reload_swaps_the_engine_and_drops_cached_routes() {
    let dir = tempfile::tempdir().unwrap();
    let state = service(&dir);
    let to_e = format!("/route?start=50.0,4.0&end={}", e_coord());
    let to_f = format!("/route?start=50.0,4.0&end={},4.0", 50.0 + 5.0 * KM_LAT);

    get(&state, &to_e).await;
    assert_eq!(get(&state, &to_e).await.1["cached"], true);
    // F is a kilometre past the last road.
    assert_eq!(get(&state, &to_f).await.0, StatusCode::BAD_REQUEST);

    let in_flight = state.engine.current();
    write_dataset(&dir, &network(true));
    let (status, body) = call(&state, "POST", "/admin/reload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"], 8);

    // Holders of the old snapshot keep a consistent view.
    assert_eq!(in_flight.graph().n_nodes(), 7);
    assert!(in_flight.route_nodes(1, 6, VehicleParams::default()).is_err());

    let (status, body) = get(&state, &to_f).await;
    assert_eq!(status, StatusCode::OK);
    assert!((body["routes"][0]["distance_km"].as_f64().unwrap() - 5.0).abs() < 1e-9);
    assert_eq!(get(&state, &to_e).await.1["cached"], false);
}

#[tokio::test]
async fn failed_reload_keeps_the_current_engine() {
    let dir = tempfile::tempdir().unwrap();
    let state = service(&dir);
    std::fs::write(dir.path().join("index.wch"), b"not an index").unwrap();

    let (status, body) = call(&state, "POST", "/admin/reload").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
    let (status, _) = get(&state, &format!("/route?start=50.0,4.0&end={}", e_coord())).await;
    assert_eq!(status, StatusCode::OK);
}
