//! Hierarchy correctness checks
//!
//! Compares hierarchy distances against plain Dijkstra on the base graph
//! and checks that every shortcut unpacks to exactly its stored length.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};
use waymark_common::BuildIntegrityError;

use super::index::ChIndex;
use super::query::ChQuery;
use super::unpack::unpack_arc;
use super::{Weight, INFINITY};
use crate::graph::{GraphStore, NodeIdx};

/// Dijkstra on the base graph (ground truth).
pub fn dijkstra(graph: &GraphStore, source: NodeIdx, target: NodeIdx) -> Option<Weight> {
    let mut dist = vec![INFINITY; graph.n_nodes()];
    let mut heap: BinaryHeap<Reverse<(Weight, NodeIdx)>> = BinaryHeap::new();
    dist[source as usize] = 0;
    heap.push(Reverse((0, source)));

    while let Some(Reverse((d, u))) = heap.pop() {
        if u == target {
            return Some(d);
        }
        if d > dist[u as usize] {
            continue;
        }
        for arc in graph.out_arcs(u) {
            let nd = d.saturating_add(arc.length_mm);
            if nd < dist[arc.head as usize] {
                dist[arc.head as usize] = nd;
                heap.push(Reverse((nd, arc.head)));
            }
        }
    }
    None
}

/// Sum of base-arc lengths along a node sequence.
pub fn base_length(graph: &GraphStore, nodes: &[NodeIdx]) -> Option<Weight> {
    nodes
        .windows(2)
        .map(|w| graph.arc(w[0], w[1]).map(|a| a.length_mm))
        .sum()
}

/// Unpacks every shortcut and compares the base-arc sum with its weight.
pub fn verify_shortcuts(index: &ChIndex, graph: &GraphStore) -> Result<(), BuildIntegrityError> {
    let mut nodes = Vec::new();
    for s in index.shortcuts() {
        nodes.clear();
        nodes.push(s.from);
        let unpacked = unpack_arc(index, s.from, s.to, &mut nodes)
            .ok()
            .and_then(|_| base_length(graph, &nodes));
        if unpacked != Some(s.weight) {
            return Err(BuildIntegrityError::ShortcutMismatch {
                from: graph.node_id(s.from),
                to: graph.node_id(s.to),
                stored_mm: s.weight,
                unpacked_mm: unpacked.unwrap_or(INFINITY),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationMismatch {
    pub source: i64,
    pub target: i64,
    pub dijkstra_mm: Option<Weight>,
    pub hierarchy_mm: Option<Weight>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub n_tests: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub unreachable_both: usize,
    pub mismatches: Vec<ValidationMismatch>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.incorrect == 0
    }
}

/// Compares `n_tests` seeded random pairs against Dijkstra.
pub fn validate_random_pairs(
    graph: &GraphStore,
    index: &ChIndex,
    n_tests: usize,
    seed: u64,
) -> ValidationReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = graph.n_nodes() as NodeIdx;
    let query = ChQuery::new(index);
    let mut report = ValidationReport {
        n_tests,
        ..ValidationReport::default()
    };

    info!(queries = n_tests, seed, "validating hierarchy against Dijkstra");

    for i in 0..n_tests {
        let source = rng.random_range(0..n);
        let target = rng.random_range(0..n);
        let expected = dijkstra(graph, source, target);
        let actual = query.distance(source, target);

        if expected == actual {
            report.correct += 1;
            if expected.is_none() {
                report.unreachable_both += 1;
            }
        } else {
            report.incorrect += 1;
            warn!(
                source = graph.node_id(source),
                target = graph.node_id(target),
                ?expected,
                ?actual,
                "hierarchy distance differs from Dijkstra"
            );
            if report.mismatches.len() < 10 {
                report.mismatches.push(ValidationMismatch {
                    source: graph.node_id(source),
                    target: graph.node_id(target),
                    dijkstra_mm: expected,
                    hierarchy_mm: actual,
                });
            }
        }

        if (i + 1) % 1000 == 0 {
            info!(done = i + 1, correct = report.correct, incorrect = report.incorrect, "validation progress");
        }
    }

    info!(
        correct = report.correct,
        incorrect = report.incorrect,
        unreachable_both = report.unreachable_both,
        "validation finished"
    );
    report
}
