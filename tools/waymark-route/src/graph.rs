//! Immutable road graph: node coordinates plus directed CSR adjacency
//!
//! External node ids are `i64` (OSM style). Internally every node gets a
//! dense `u32` index in ascending id order, so two loads of the same tables
//! produce identical indices and therefore identical hierarchies.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use waymark_common::{GraphLoadError, LatLon};

use crate::formats::graph_file;
use crate::geo::BoundingBox;

/// Dense internal node index.
pub type NodeIdx = u32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

/// One directed road segment. Two-way roads arrive as two rows; no reverse
/// arc is ever synthesised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: i64,
    pub to_id: i64,
    pub distance_m: f64,
    pub speed_limit_kmh: f64,
    #[serde(default)]
    pub oneway: bool,
    #[serde(default)]
    pub way_id: i64,
}

/// Outgoing arc in the CSR adjacency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseArc {
    pub head: NodeIdx,
    pub length_mm: u64,
    pub speed_kmh: f64,
}

pub(crate) fn metres_to_mm(distance_m: f64) -> u64 {
    (distance_m * 1000.0).round() as u64
}

#[derive(Debug)]
pub struct GraphStore {
    nodes: Vec<Node>,
    index_of: FxHashMap<i64, NodeIdx>,
    offsets: Vec<u32>,
    arcs: Vec<BaseArc>,
    edges: Vec<Edge>,
    component: Vec<u32>,
    n_components: usize,
    bbox: BoundingBox,
    fingerprint: u64,
}

impl GraphStore {
    /// Validates and indexes node and edge tables.
    pub fn new(mut nodes: Vec<Node>, mut edges: Vec<Edge>) -> Result<Self, GraphLoadError> {
        if nodes.is_empty() {
            return Err(GraphLoadError::Empty);
        }
        nodes.sort_by_key(|n| n.id);
        if let Some(pair) = nodes.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(GraphLoadError::DuplicateNode(pair[0].id));
        }
        for node in &nodes {
            LatLon::new(node.lat, node.lon).map_err(|e| GraphLoadError::InvalidNode {
                id: node.id,
                reason: e.to_string(),
            })?;
        }

        let index_of: FxHashMap<i64, NodeIdx> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i as NodeIdx))
            .collect();

        for edge in &edges {
            for endpoint in [edge.from_id, edge.to_id] {
                if !index_of.contains_key(&endpoint) {
                    return Err(GraphLoadError::UnknownNode {
                        from: edge.from_id,
                        to: edge.to_id,
                        missing: endpoint,
                    });
                }
            }
            if !edge.distance_m.is_finite() || edge.distance_m < 0.0 {
                return Err(GraphLoadError::InvalidEdge {
                    from: edge.from_id,
                    to: edge.to_id,
                    reason: format!("distance {} m", edge.distance_m),
                });
            }
            if !edge.speed_limit_kmh.is_finite() || edge.speed_limit_kmh <= 0.0 {
                return Err(GraphLoadError::InvalidEdge {
                    from: edge.from_id,
                    to: edge.to_id,
                    reason: format!("speed limit {} km/h", edge.speed_limit_kmh),
                });
            }
        }

        edges.sort_by(|a, b| {
            a.from_id
                .cmp(&b.from_id)
                .then(a.to_id.cmp(&b.to_id))
                .then(a.distance_m.total_cmp(&b.distance_m))
                .then(a.way_id.cmp(&b.way_id))
                .then(a.speed_limit_kmh.total_cmp(&b.speed_limit_kmh))
        });

        // Edges are sorted by tail id and ids map monotonically to indices,
        // so the CSR falls out of a single pass.
        let n = nodes.len();
        let mut offsets = vec![0u32; n + 1];
        let mut arcs = Vec::with_capacity(edges.len());
        for edge in &edges {
            let tail = index_of[&edge.from_id] as usize;
            offsets[tail + 1] += 1;
            arcs.push(BaseArc {
                head: index_of[&edge.to_id],
                length_mm: metres_to_mm(edge.distance_m),
                speed_kmh: edge.speed_limit_kmh,
            });
        }
        for i in 0..n {
            offsets[i + 1] += offsets[i];
        }

        let (component, n_components) = weak_components(n, &offsets, &arcs);

        let bbox = BoundingBox::from_points(nodes.iter().map(|n| LatLon {
            lat: n.lat,
            lon: n.lon,
        }))
        .ok_or(GraphLoadError::Empty)?;

        let fingerprint = graph_file::body_checksum(&nodes, &edges);

        info!(
            nodes = n,
            edges = edges.len(),
            components = n_components,
            fingerprint = %format!("{fingerprint:016x}"),
            "road graph indexed"
        );

        Ok(Self {
            nodes,
            index_of,
            offsets,
            arcs,
            edges,
            component,
            n_components,
            bbox,
            fingerprint,
        })
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_arcs(&self) -> usize {
        self.arcs.len()
    }

    /// Nodes in ascending id order; position equals the dense index.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Edge rows in canonical (sorted) order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn node_id(&self, idx: NodeIdx) -> i64 {
        self.nodes[idx as usize].id
    }

    pub fn coord(&self, idx: NodeIdx) -> LatLon {
        let node = &self.nodes[idx as usize];
        LatLon {
            lat: node.lat,
            lon: node.lon,
        }
    }

    pub fn index_of(&self, id: i64) -> Option<NodeIdx> {
        self.index_of.get(&id).copied()
    }

    pub fn out_arcs(&self, idx: NodeIdx) -> &[BaseArc] {
        let start = self.offsets[idx as usize] as usize;
        let end = self.offsets[idx as usize + 1] as usize;
        &self.arcs[start..end]
    }

    /// Shortest parallel arc `from -> to`, if any.
    pub fn arc(&self, from: NodeIdx, to: NodeIdx) -> Option<&BaseArc> {
        self.out_arcs(from)
            .iter()
            .filter(|a| a.head == to)
            .min_by_key(|a| a.length_mm)
    }

    pub fn same_component(&self, a: NodeIdx, b: NodeIdx) -> bool {
        self.component[a as usize] == self.component[b as usize]
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// CRC-64 of the canonical node and edge tables.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Labels weakly connected components with a union-find pass.
fn weak_components(n: usize, offsets: &[u32], arcs: &[BaseArc]) -> (Vec<u32>, usize) {
    let mut parent: Vec<u32> = (0..n as u32).collect();
    let mut rank = vec![0u8; n];

    fn find(parent: &mut [u32], mut x: u32) -> u32 {
        while parent[x as usize] != x {
            let grandparent = parent[parent[x as usize] as usize];
            parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    for tail in 0..n {
        for arc in &arcs[offsets[tail] as usize..offsets[tail + 1] as usize] {
            let a = find(&mut parent, tail as u32);
            let b = find(&mut parent, arc.head);
            if a == b {
                continue;
            }
            match rank[a as usize].cmp(&rank[b as usize]) {
                std::cmp::Ordering::Less => parent[a as usize] = b,
                std::cmp::Ordering::Greater => parent[b as usize] = a,
                std::cmp::Ordering::Equal => {
                    parent[b as usize] = a;
                    rank[a as usize] += 1;
                }
            }
        }
    }

    // Relabel roots densely in node order for stable component ids.
    let mut label_of_root: FxHashMap<u32, u32> = FxHashMap::default();
    let mut component = Vec::with_capacity(n);
    for v in 0..n as u32 {
        let root = find(&mut parent, v);
        let next = label_of_root.len() as u32;
        component.push(*label_of_root.entry(root).or_insert(next));
    }
    let count = label_of_root.len();
    (component, count)
}
