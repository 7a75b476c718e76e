//! Graph fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use waymark_route::{BuilderConfig, Edge, GraphStore, HierarchyBuilder, Node, PathfindingEngine};

/// Roughly 1 km of latitude.
pub const KM_LAT: f64 = 0.009;

pub fn node(id: i64, lat: f64, lon: f64) -> Node {
    Node { id, lat, lon }
}

pub fn road(from: i64, to: i64, distance_m: f64, speed_kmh: f64) -> Edge {
    Edge {
        from_id: from,
        to_id: to,
        distance_m,
        speed_limit_kmh: speed_kmh,
        oneway: true,
        way_id: from.min(to),
    }
}

/// Both directions of a two-way road.
pub fn two_way(a: i64, b: i64, distance_m: f64, speed_kmh: f64) -> [Edge; 2] {
    let mut forward = road(a, b, distance_m, speed_kmh);
    let mut back = road(b, a, distance_m, speed_kmh);
    forward.oneway = false;
    back.oneway = false;
    [forward, back]
}

/// A(1) <-> B(2) <-> C(3) <-> D(4) <-> E(5), 1 km per hop at 60 km/h,
/// running north from (50.0, 4.0).
pub fn chain_tables() -> (Vec<Node>, Vec<Edge>) {
    let nodes = (1..=5)
        .map(|i| node(i, 50.0 + (i - 1) as f64 * KM_LAT, 4.0))
        .collect();
    let edges = (1..5).flat_map(|i| two_way(i, i + 1, 1000.0, 60.0)).collect();
    (nodes, edges)
}

pub fn chain() -> GraphStore {
    let (nodes, edges) = chain_tables();
    GraphStore::new(nodes, edges).unwrap()
}

/// `side` x `side` grid with seeded random lengths. Every tenth street is
/// one-way, so reachability is not symmetric everywhere.
pub fn random_grid(side: i64, seed: u64) -> GraphStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let id = |r: i64, c: i64| r * side + c + 1;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    for r in 0..side {
        for c in 0..side {
            nodes.push(node(id(r, c), 50.0 + r as f64 * 0.002, 4.0 + c as f64 * 0.003));
        }
    }
    let mut link = |a: i64, b: i64, rng: &mut StdRng| {
        let length = rng.random_range(150.0..400.0);
        let speed = [30.0, 50.0, 70.0][rng.random_range(0..3)];
        if rng.random_range(0..10) == 0 {
            edges.push(road(a, b, length, speed));
        } else {
            edges.extend(two_way(a, b, length, speed));
        }
    };
    for r in 0..side {
        for c in 0..side {
            if c + 1 < side {
                link(id(r, c), id(r, c + 1), &mut rng);
            }
            if r + 1 < side {
                link(id(r, c), id(r + 1, c), &mut rng);
            }
        }
    }
    GraphStore::new(nodes, edges).unwrap()
}

pub fn engine_for(graph: GraphStore) -> PathfindingEngine {
    let (index, _) = HierarchyBuilder::build(&graph, BuilderConfig::default()).unwrap();
    PathfindingEngine::new(Arc::new(graph), Arc::new(index), 500.0, 0.05).unwrap()
}
