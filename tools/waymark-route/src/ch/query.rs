//! Bidirectional hierarchy search
//!
//! The forward search relaxes upward arcs from the source; the backward
//! search relaxes downward arcs into the target, i.e. upward arcs of the
//! transposed graph. A frontier stops once its smallest key reaches the best
//! meeting distance seen so far.

use std::cmp::Reverse;

use priority_queue::PriorityQueue;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::index::{ChArc, ChIndex};
use super::{Weight, INFINITY};
use crate::graph::NodeIdx;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub distance: Weight,
    /// Hierarchy-level path from source to target; may contain shortcuts.
    pub nodes: Vec<NodeIdx>,
    pub settled: usize,
}

#[derive(Debug, Clone, Copy)]
struct Label {
    dist: Weight,
    parent: NodeIdx,
}

struct Frontier {
    queue: PriorityQueue<NodeIdx, Reverse<Weight>>,
    labels: FxHashMap<NodeIdx, Label>,
    settled: usize,
}

impl Frontier {
    fn new(origin: NodeIdx) -> Self {
        let mut queue = PriorityQueue::new();
        queue.push(origin, Reverse(0));
        let mut labels = FxHashMap::default();
        labels.insert(origin, Label { dist: 0, parent: origin });
        Self {
            queue,
            labels,
            settled: 0,
        }
    }

    fn min_key(&self) -> Option<Weight> {
        self.queue.peek().map(|(_, Reverse(d))| *d)
    }

    fn dist(&self, node: NodeIdx) -> Weight {
        self.labels.get(&node).map_or(INFINITY, |l| l.dist)
    }

    fn pop(&mut self) -> Option<(NodeIdx, Weight)> {
        let (node, Reverse(dist)) = self.queue.pop()?;
        self.settled += 1;
        Some((node, dist))
    }

    fn relax(&mut self, from: NodeIdx, from_dist: Weight, arcs: &[ChArc]) {
        for arc in arcs {
            let nd = from_dist.saturating_add(arc.weight);
            if nd < self.dist(arc.node) {
                self.labels.insert(arc.node, Label { dist: nd, parent: from });
                self.queue.push_increase(arc.node, Reverse(nd));
            }
        }
    }

    /// Parent chain from `node` back to the origin, starting at `node`.
    fn chain(&self, mut node: NodeIdx) -> Vec<NodeIdx> {
        let mut out = vec![node];
        while let Some(label) = self.labels.get(&node) {
            if label.parent == node {
                break;
            }
            node = label.parent;
            out.push(node);
        }
        out
    }
}

pub struct ChQuery<'a> {
    index: &'a ChIndex,
}

impl<'a> ChQuery<'a> {
    pub fn new(index: &'a ChIndex) -> Self {
        Self { index }
    }

    pub fn distance(&self, source: NodeIdx, target: NodeIdx) -> Option<Weight> {
        self.shortest_path(source, target).map(|r| r.distance)
    }

    /// Shortest path between two dense indices, or `None` if unreachable.
    pub fn shortest_path(&self, source: NodeIdx, target: NodeIdx) -> Option<QueryResult> {
        if source == target {
            return Some(QueryResult {
                distance: 0,
                nodes: vec![source],
                settled: 0,
            });
        }

        let mut fwd = Frontier::new(source);
        let mut bwd = Frontier::new(target);
        let mut best = INFINITY;
        let mut meeting: Option<NodeIdx> = None;
        let mut forward_turn = true;

        loop {
            let fwd_open = fwd.min_key().is_some_and(|d| d < best);
            let bwd_open = bwd.min_key().is_some_and(|d| d < best);
            if !fwd_open && !bwd_open {
                break;
            }

            let go_forward = fwd_open && (forward_turn || !bwd_open);
            forward_turn = !forward_turn;

            let (this, other) = if go_forward {
                (&mut fwd, &bwd)
            } else {
                (&mut bwd, &fwd)
            };
            let Some((node, dist)) = this.pop() else {
                continue;
            };

            let other_dist = other.dist(node);
            if other_dist != INFINITY && dist + other_dist < best {
                best = dist + other_dist;
                meeting = Some(node);
            }

            let arcs = if go_forward {
                self.index.up_arcs(node)
            } else {
                self.index.down_arcs(node)
            };
            this.relax(node, dist, arcs);
        }

        let meeting = meeting?;
        let mut nodes = fwd.chain(meeting);
        nodes.reverse();
        nodes.extend(bwd.chain(meeting).into_iter().skip(1));

        trace!(
            source,
            target,
            meeting,
            distance = best,
            settled_fwd = fwd.settled,
            settled_bwd = bwd.settled,
            "hierarchy query"
        );

        Some(QueryResult {
            distance: best,
            nodes,
            settled: fwd.settled + bwd.settled,
        })
    }
}
