//! Local pathfinding over a loaded hierarchy
//!
//! A [`PathfindingEngine`] is an immutable snapshot (graph, hierarchy and
//! snapping index). Queries borrow it read-only; [`EngineHandle`] swaps in
//! a new snapshot after a rebuild without readers ever seeing a mix.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use waymark_common::{GraphLoadError, LatLon, RouteError};

use crate::ch::{unpack_path, ChIndex, ChQuery};
use crate::geo::BoundingBox;
use crate::graph::{GraphStore, NodeIdx};
use crate::spatial::SpatialIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    #[default]
    Car,
    Truck,
    Motorcycle,
}

impl VehicleType {
    /// Speed cap applied on top of posted limits when estimating duration.
    pub fn max_speed_kmh(self) -> Option<f64> {
        match self {
            VehicleType::Car => None,
            VehicleType::Truck => Some(90.0),
            VehicleType::Motorcycle => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleType::Car => "car",
            VehicleType::Truck => "truck",
            VehicleType::Motorcycle => "motorcycle",
        }
    }
}

impl FromStr for VehicleType {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "car" => Ok(VehicleType::Car),
            "truck" | "hgv" => Ok(VehicleType::Truck),
            "motorcycle" | "motorbike" => Ok(VehicleType::Motorcycle),
            other => Err(RouteError::InvalidRequest(format!("unknown vehicle type '{other}'"))),
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Fastest,
    Shortest,
}

impl FromStr for RoutingMode {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fastest" => Ok(RoutingMode::Fastest),
            "shortest" => Ok(RoutingMode::Shortest),
            other => Err(RouteError::InvalidRequest(format!("unknown routing mode '{other}'"))),
        }
    }
}

/// Vehicle parameters that change what a provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VehicleParams {
    pub vehicle_type: VehicleType,
    pub routing_mode: RoutingMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub distance_m: f64,
    pub duration_s: f64,
    pub node_ids: Vec<i64>,
    pub geometry: Vec<LatLon>,
}

pub struct PathfindingEngine {
    graph: Arc<GraphStore>,
    index: Arc<ChIndex>,
    spatial: SpatialIndex,
    max_snap_radius_m: f64,
    coverage: BoundingBox,
}

impl PathfindingEngine {
    pub fn new(
        graph: Arc<GraphStore>,
        index: Arc<ChIndex>,
        max_snap_radius_m: f64,
        coverage_margin_deg: f64,
    ) -> Result<Self, GraphLoadError> {
        if index.graph_fingerprint() != graph.fingerprint() || index.n_nodes() != graph.n_nodes() {
            return Err(GraphLoadError::IndexMismatch {
                reason: format!(
                    "hierarchy over {} nodes ({:016x}) attached to graph of {} nodes ({:016x})",
                    index.n_nodes(),
                    index.graph_fingerprint(),
                    graph.n_nodes(),
                    graph.fingerprint()
                ),
            });
        }
        let spatial = SpatialIndex::build(&graph);
        let coverage = graph.bbox().expand(coverage_margin_deg);
        info!(
            nodes = graph.n_nodes(),
            snappable = spatial.len(),
            shortcuts = index.n_shortcuts(),
            max_snap_radius_m,
            "pathfinding engine ready"
        );
        Ok(Self {
            graph,
            index,
            spatial,
            max_snap_radius_m,
            coverage,
        })
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn index(&self) -> &ChIndex {
        &self.index
    }

    /// Whether both points fall inside the dataset's (padded) bounding box.
    pub fn covers(&self, start: LatLon, end: LatLon) -> bool {
        self.coverage.contains(start) && self.coverage.contains(end)
    }

    pub fn snap(&self, p: LatLon) -> Result<NodeIdx, RouteError> {
        self.spatial.snap(&self.graph, p, self.max_snap_radius_m)
    }

    /// Routes between two raw coordinates, snapping both first.
    pub fn route(&self, start: LatLon, end: LatLon, vehicle: VehicleParams) -> Result<PathResult, RouteError> {
        let source = self.snap(start)?;
        let target = self.snap(end)?;
        self.route_indices(source, target, vehicle)
    }

    /// Routes between two external node ids.
    pub fn route_nodes(&self, from_id: i64, to_id: i64, vehicle: VehicleParams) -> Result<PathResult, RouteError> {
        let resolve = |id: i64| {
            self.graph
                .index_of(id)
                .ok_or_else(|| RouteError::InvalidRequest(format!("unknown node {id}")))
        };
        self.route_indices(resolve(from_id)?, resolve(to_id)?, vehicle)
    }

    fn route_indices(&self, source: NodeIdx, target: NodeIdx, vehicle: VehicleParams) -> Result<PathResult, RouteError> {
        let from = self.graph.node_id(source);
        let to = self.graph.node_id(target);
        if !self.graph.same_component(source, target) {
            return Err(RouteError::Disconnected { from, to });
        }

        let result = ChQuery::new(&self.index)
            .shortest_path(source, target)
            .ok_or(RouteError::NoPath { from, to })?;
        let nodes = unpack_path(&self.index, &result.nodes).map_err(|e| RouteError::ProviderError {
            provider: "local".to_string(),
            reason: e.to_string(),
        })?;

        let speed_cap = vehicle.vehicle_type.max_speed_kmh();
        let mut duration_s = 0.0;
        for pair in nodes.windows(2) {
            if let Some(arc) = self.graph.arc(pair[0], pair[1]) {
                let kmh = speed_cap.map_or(arc.speed_kmh, |cap| arc.speed_kmh.min(cap));
                duration_s += (arc.length_mm as f64 / 1000.0) / (kmh / 3.6);
            }
        }

        debug!(
            from,
            to,
            distance_mm = result.distance,
            settled = result.settled,
            hops = nodes.len(),
            "local route"
        );

        Ok(PathResult {
            distance_m: result.distance as f64 / 1000.0,
            duration_s,
            node_ids: nodes.iter().map(|&n| self.graph.node_id(n)).collect(),
            geometry: nodes.iter().map(|&n| self.graph.coord(n)).collect(),
        })
    }
}

/// Swappable reference to the current engine snapshot.
pub struct EngineHandle {
    current: RwLock<Arc<PathfindingEngine>>,
}

impl EngineHandle {
    pub fn new(engine: PathfindingEngine) -> Self {
        Self {
            current: RwLock::new(Arc::new(engine)),
        }
    }

    pub fn current(&self) -> Arc<PathfindingEngine> {
        self.current.read().clone()
    }

    /// Replaces the snapshot; in-flight queries finish on the old one.
    pub fn swap(&self, engine: PathfindingEngine) -> Arc<PathfindingEngine> {
        let fresh = Arc::new(engine);
        let old = std::mem::replace(&mut *self.current.write(), fresh);
        info!(
            nodes = self.current().graph().n_nodes(),
            "engine snapshot swapped"
        );
        old
    }
}
