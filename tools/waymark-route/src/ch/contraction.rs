//! Offline node contraction
//!
//! Nodes are contracted one at a time in lazy priority order. Contracting
//! `v` removes it from the active overlay and, for every in-neighbour `u`
//! and out-neighbour `w`, adds `u -> w` unless a bounded witness search
//! finds a path of equal or smaller length that avoids `v`.
//!
//! The overlay keeps a single arc per ordered node pair. A shortcut only
//! replaces an existing arc when strictly shorter, so the final overlay is
//! exactly "collapsed base arcs, overridden by the shortcut table", which is
//! what [`ChIndex::assemble`] rebuilds when loading from disk.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use rustc_hash::FxHashMap;
use tracing::{debug, info};
use waymark_common::BuildIntegrityError;

use super::index::{ChIndex, ShortcutEdge};
use super::ordering::{self, ContractionQueue};
use super::validate;
use super::{BuildStats, Weight, INFINITY, NO_VIA};
use crate::graph::{GraphStore, NodeIdx};

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Settled-node budget per witness search. Hitting it adds the shortcut.
    pub witness_settle_limit: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            witness_settle_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OverlayArc {
    node: NodeIdx,
    weight: Weight,
    via: u32,
}

/// Bounded local Dijkstra reused across witness searches.
#[derive(Default)]
struct WitnessSearch {
    dist: FxHashMap<NodeIdx, Weight>,
    heap: BinaryHeap<Reverse<(Weight, NodeIdx)>>,
    limit_hits: u64,
}

impl WitnessSearch {
    fn run(
        &mut self,
        out_arcs: &[Vec<OverlayArc>],
        contracted: &[bool],
        source: NodeIdx,
        avoid: NodeIdx,
        max_weight: Weight,
        settle_limit: usize,
    ) {
        self.dist.clear();
        self.heap.clear();
        self.dist.insert(source, 0);
        self.heap.push(Reverse((0, source)));

        let mut settled = 0usize;
        while let Some(Reverse((d, u))) = self.heap.pop() {
            if d > self.distance(u) {
                continue;
            }
            if d > max_weight {
                break;
            }
            if settled >= settle_limit {
                self.limit_hits += 1;
                break;
            }
            settled += 1;

            for arc in &out_arcs[u as usize] {
                if arc.node == avoid || contracted[arc.node as usize] {
                    continue;
                }
                let nd = d.saturating_add(arc.weight);
                if nd <= max_weight && nd < self.distance(arc.node) {
                    self.dist.insert(arc.node, nd);
                    self.heap.push(Reverse((nd, arc.node)));
                }
            }
        }
    }

    /// Tentative distance; every finite value is the length of a real path.
    fn distance(&self, node: NodeIdx) -> Weight {
        self.dist.get(&node).copied().unwrap_or(INFINITY)
    }
}

pub struct HierarchyBuilder<'g> {
    graph: &'g GraphStore,
    config: BuilderConfig,
    out_arcs: Vec<Vec<OverlayArc>>,
    in_arcs: Vec<Vec<OverlayArc>>,
    contracted: Vec<bool>,
    contracted_neighbors: Vec<u32>,
    rank: Vec<u32>,
    witness: WitnessSearch,
    candidates: Vec<(NodeIdx, NodeIdx, Weight)>,
}

impl<'g> HierarchyBuilder<'g> {
    pub fn new(graph: &'g GraphStore, config: BuilderConfig) -> Self {
        let n = graph.n_nodes();
        let mut out_arcs: Vec<Vec<OverlayArc>> = vec![Vec::new(); n];
        let mut in_arcs: Vec<Vec<OverlayArc>> = vec![Vec::new(); n];

        // Base arcs are sorted by (head, length) per tail, so the first arc
        // seen for a pair is the shortest parallel one.
        for u in 0..n as NodeIdx {
            for arc in graph.out_arcs(u) {
                if arc.head == u {
                    continue;
                }
                let list = &mut out_arcs[u as usize];
                if list.last().is_some_and(|a| a.node == arc.head) {
                    continue;
                }
                list.push(OverlayArc {
                    node: arc.head,
                    weight: arc.length_mm,
                    via: NO_VIA,
                });
                in_arcs[arc.head as usize].push(OverlayArc {
                    node: u,
                    weight: arc.length_mm,
                    via: NO_VIA,
                });
            }
        }

        Self {
            graph,
            config,
            out_arcs,
            in_arcs,
            contracted: vec![false; n],
            contracted_neighbors: vec![0; n],
            rank: vec![u32::MAX; n],
            witness: WitnessSearch::default(),
            candidates: Vec::new(),
        }
    }

    /// Contracts the whole graph, checks the result and returns the index.
    ///
    /// Fails with [`BuildIntegrityError`] when no shortcut was produced,
    /// when the order is not a bijection, or when a shortcut does not
    /// unpack to its stored length. Callers must not promote the index then.
    pub fn build(graph: &GraphStore, config: BuilderConfig) -> Result<(ChIndex, BuildStats), BuildIntegrityError> {
        let start = Instant::now();
        let n = graph.n_nodes();
        info!(
            nodes = n,
            arcs = graph.n_arcs(),
            witness_limit = config.witness_settle_limit,
            "contracting road graph"
        );

        let mut builder = HierarchyBuilder::new(graph, config);
        let initial: Vec<(i64, NodeIdx)> = (0..n as NodeIdx)
            .map(|v| (builder.priority(v), v))
            .collect();
        let mut queue = ContractionQueue::new(initial);

        let mut next_rank = 0u32;
        while let Some(node) = queue.pop_lazy(|v| builder.priority(v)) {
            builder.contract(node, next_rank);
            next_rank += 1;
            if next_rank % 100_000 == 0 {
                debug!(contracted = next_rank, total = n, "contraction progress");
            }
        }

        let witness_limit_hits = builder.witness.limit_hits;
        let (rank, shortcuts) = builder.finish();

        ordering::check_bijection(&rank)?;
        if rank.len() != n {
            return Err(BuildIntegrityError::OrderNotBijection {
                reason: format!("{} ranks for {n} nodes", rank.len()),
            });
        }
        if shortcuts.is_empty() {
            return Err(BuildIntegrityError::NoShortcuts { nodes: n });
        }

        let index = ChIndex::assemble(graph, rank, &shortcuts);
        validate::verify_shortcuts(&index, graph)?;

        let stats = BuildStats {
            nodes: n,
            base_arcs: graph.n_arcs(),
            shortcuts: shortcuts.len(),
            up_arcs: index.n_up_arcs(),
            down_arcs: index.n_down_arcs(),
            witness_limit_hits,
            elapsed_ms: start.elapsed().as_millis(),
        };
        info!(
            nodes = stats.nodes,
            shortcuts = stats.shortcuts,
            up_arcs = stats.up_arcs,
            down_arcs = stats.down_arcs,
            witness_limit_hits = stats.witness_limit_hits,
            elapsed_ms = stats.elapsed_ms as u64,
            "contraction hierarchy built"
        );

        Ok((index, stats))
    }

    fn active(&self, list: &[OverlayArc], node: NodeIdx) -> Vec<OverlayArc> {
        list.iter()
            .filter(|a| a.node != node && !self.contracted[a.node as usize])
            .copied()
            .collect()
    }

    /// Fills `self.candidates` with the shortcuts contracting `node` needs.
    fn collect_shortcuts(&mut self, node: NodeIdx) {
        self.candidates.clear();
        let ins = self.active(&self.in_arcs[node as usize], node);
        let outs = self.active(&self.out_arcs[node as usize], node);
        if ins.is_empty() || outs.is_empty() {
            return;
        }
        let max_out = outs.iter().map(|a| a.weight).max().unwrap_or(0);

        for inc in &ins {
            self.witness.run(
                &self.out_arcs,
                &self.contracted,
                inc.node,
                node,
                inc.weight.saturating_add(max_out),
                self.config.witness_settle_limit,
            );
            for out in &outs {
                if out.node == inc.node {
                    continue;
                }
                let through = inc.weight + out.weight;
                if self.witness.distance(out.node) > through {
                    self.candidates.push((inc.node, out.node, through));
                }
            }
        }
    }

    fn priority(&mut self, node: NodeIdx) -> i64 {
        self.collect_shortcuts(node);
        let removed = self.active(&self.in_arcs[node as usize], node).len()
            + self.active(&self.out_arcs[node as usize], node).len();
        ordering::priority(
            self.candidates.len(),
            removed,
            self.contracted_neighbors[node as usize],
        )
    }

    fn contract(&mut self, node: NodeIdx, rank: u32) {
        self.collect_shortcuts(node);
        let candidates = std::mem::take(&mut self.candidates);
        for &(from, to, weight) in &candidates {
            self.insert_shortcut(from, to, weight, node);
        }
        self.candidates = candidates;

        let mut neighbors: Vec<NodeIdx> = self.in_arcs[node as usize]
            .iter()
            .chain(self.out_arcs[node as usize].iter())
            .map(|a| a.node)
            .filter(|&v| v != node && !self.contracted[v as usize])
            .collect();
        neighbors.sort_unstable();
        neighbors.dedup();
        for v in neighbors {
            self.contracted_neighbors[v as usize] += 1;
        }

        self.contracted[node as usize] = true;
        self.rank[node as usize] = rank;
    }

    fn insert_shortcut(&mut self, from: NodeIdx, to: NodeIdx, weight: Weight, via: NodeIdx) {
        if let Some(arc) = self.out_arcs[from as usize].iter_mut().find(|a| a.node == to) {
            if weight >= arc.weight {
                return;
            }
            arc.weight = weight;
            arc.via = via;
            if let Some(back) = self.in_arcs[to as usize].iter_mut().find(|a| a.node == from) {
                back.weight = weight;
                back.via = via;
            }
            return;
        }
        self.out_arcs[from as usize].push(OverlayArc { node: to, weight, via });
        self.in_arcs[to as usize].push(OverlayArc { node: from, weight, via });
    }

    /// Final node order and the shortcut arcs that survived in the overlay.
    fn finish(self) -> (Vec<u32>, Vec<ShortcutEdge>) {
        let mut shortcuts = Vec::new();
        for (from, list) in self.out_arcs.iter().enumerate() {
            for arc in list.iter().filter(|a| a.via != NO_VIA) {
                shortcuts.push(ShortcutEdge {
                    from: from as NodeIdx,
                    to: arc.node,
                    weight: arc.weight,
                    via: arc.via,
                });
            }
        }
        shortcuts.sort_by_key(|s| (s.from, s.to));
        debug!(
            graph_nodes = self.graph.n_nodes(),
            shortcuts = shortcuts.len(),
            "overlay finalised"
        );
        (self.rank, shortcuts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};

    fn two_way(a: i64, b: i64, m: f64) -> [Edge; 2] {
        let e = |from, to| Edge {
            from_id: from,
            to_id: to,
            distance_m: m,
            speed_limit_kmh: 60.0,
            oneway: false,
            way_id: 0,
        };
        [e(a, b), e(b, a)]
    }

    fn chain(n: i64) -> GraphStore {
        let nodes = (1..=n)
            .map(|id| Node { id, lat: 50.0, lon: 4.0 + id as f64 * 0.01 })
            .collect();
        let edges = (1..n).flat_map(|id| two_way(id, id + 1, 1000.0)).collect();
        GraphStore::new(nodes, edges).unwrap()
    }

    #[test]
    fn five_node_chain_needs_a_shortcut() {
        let graph = chain(5);
        let (index, stats) = HierarchyBuilder::build(&graph, BuilderConfig::default()).unwrap();
        assert!(stats.shortcuts > 0);
        assert_eq!(index.n_shortcuts(), stats.shortcuts);
        // Every shortcut spans exactly two kilometres of base road or more.
        for s in index.shortcuts() {
            assert!(s.weight >= 2_000_000);
        }
    }

    #[test]
    fn graph_without_shortcuts_is_rejected() {
        // Two nodes: contracting either never needs a shortcut.
        let graph = chain(2);
        let err = HierarchyBuilder::build(&graph, BuilderConfig::default()).unwrap_err();
        assert_eq!(err, BuildIntegrityError::NoShortcuts { nodes: 2 });
    }

    #[test]
    fn witness_path_suppresses_shortcut() {
        // Triangle 1-2-3 with a direct 1-3 road shorter than via 2.
        let nodes = vec![
            Node { id: 1, lat: 0.0, lon: 0.0 },
            Node { id: 2, lat: 0.0, lon: 0.01 },
            Node { id: 3, lat: 0.0, lon: 0.02 },
        ];
        let mut edges: Vec<Edge> = Vec::new();
        edges.extend(two_way(1, 2, 1000.0));
        edges.extend(two_way(2, 3, 1000.0));
        edges.extend(two_way(1, 3, 1500.0));
        let graph = GraphStore::new(nodes, edges).unwrap();
        let mut builder = HierarchyBuilder::new(&graph, BuilderConfig::default());
        builder.collect_shortcuts(1);
        assert!(builder.candidates.is_empty());
    }
}
