//! Nearest-node snapping
//!
//! Nodes are indexed by their position on the unit sphere, so the R-tree's
//! Euclidean nearest neighbour is also the great-circle nearest. The radius
//! check then uses haversine metres.

use rstar::{PointDistance, RTree, RTreeObject, AABB};
use waymark_common::{LatLon, RouteError};

use crate::geo::{distance_m, unit_vector};
use crate::graph::{GraphStore, NodeIdx};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexedNode {
    pub position: [f64; 3],
    pub node: NodeIdx,
}

impl RTreeObject for IndexedNode {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedNode {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        self.position
            .iter()
            .zip(point.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    fn contains_point(&self, point: &[f64; 3]) -> bool {
        self.position == *point
    }
}

pub struct SpatialIndex {
    tree: RTree<IndexedNode>,
}

impl SpatialIndex {
    /// Indexes every node that touches at least one arc; isolated nodes
    /// would snap a query onto a point nothing can leave.
    pub fn build(graph: &GraphStore) -> Self {
        let n = graph.n_nodes();
        let mut touched = vec![false; n];
        for u in 0..n as NodeIdx {
            let arcs = graph.out_arcs(u);
            if !arcs.is_empty() {
                touched[u as usize] = true;
            }
            for arc in arcs {
                touched[arc.head as usize] = true;
            }
        }

        let points: Vec<IndexedNode> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(i, _)| touched[*i])
            .map(|(i, node)| IndexedNode {
                position: unit_vector(node.lat, node.lon),
                node: i as NodeIdx,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Nearest indexed node and its haversine distance in metres.
    pub fn nearest(&self, graph: &GraphStore, p: LatLon) -> Option<(NodeIdx, f64)> {
        self.tree
            .nearest_neighbor(&unit_vector(p.lat, p.lon))
            .map(|hit| (hit.node, distance_m(p, graph.coord(hit.node))))
    }

    /// Nearest node within `max_radius_m`, or [`RouteError::SnapFailure`].
    pub fn snap(&self, graph: &GraphStore, p: LatLon, max_radius_m: f64) -> Result<NodeIdx, RouteError> {
        match self.nearest(graph, p) {
            Some((node, d)) if d <= max_radius_m => Ok(node),
            _ => Err(RouteError::SnapFailure {
                lat: p.lat,
                lon: p.lon,
                radius_m: max_radius_m,
            }),
        }
    }
}
