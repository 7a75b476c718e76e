//! Lazy node ordering for contraction

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use waymark_common::BuildIntegrityError;

use crate::graph::NodeIdx;

/// Edge difference plus the number of already contracted neighbours.
///
/// The neighbour term spreads contraction evenly over the graph instead of
/// eating one region first.
pub(super) fn priority(shortcuts_added: usize, arcs_removed: usize, contracted_neighbors: u32) -> i64 {
    shortcuts_added as i64 - arcs_removed as i64 + i64::from(contracted_neighbors)
}

/// Min-heap of `(priority, node)`; equal priorities pop the lower index first.
pub(super) struct ContractionQueue {
    heap: BinaryHeap<Reverse<(i64, NodeIdx)>>,
}

impl ContractionQueue {
    pub(super) fn new(initial: impl IntoIterator<Item = (i64, NodeIdx)>) -> Self {
        Self {
            heap: initial.into_iter().map(Reverse).collect(),
        }
    }

    /// Pops the next node to contract.
    ///
    /// Priorities go stale as neighbours are contracted, so the popped node's
    /// priority is recomputed; if it got worse than the next candidate it is
    /// pushed back and the loop continues.
    pub(super) fn pop_lazy<F>(&mut self, mut current_priority: F) -> Option<NodeIdx>
    where
        F: FnMut(NodeIdx) -> i64,
    {
        while let Some(Reverse((stored, node))) = self.heap.pop() {
            let current = current_priority(node);
            if current > stored {
                if let Some(Reverse(next)) = self.heap.peek() {
                    if (current, node) > *next {
                        self.heap.push(Reverse((current, node)));
                        continue;
                    }
                }
            }
            return Some(node);
        }
        None
    }
}

/// Checks that ranks form a permutation of `0..n`.
pub(crate) fn check_bijection(rank: &[u32]) -> Result<(), BuildIntegrityError> {
    let n = rank.len();
    let mut seen = vec![false; n];
    for (node, &r) in rank.iter().enumerate() {
        let slot = seen
            .get_mut(r as usize)
            .ok_or_else(|| BuildIntegrityError::OrderNotBijection {
                reason: format!("node {node} has rank {r} outside 0..{n}"),
            })?;
        if *slot {
            return Err(BuildIntegrityError::OrderNotBijection {
                reason: format!("rank {r} assigned twice"),
            });
        }
        *slot = true;
    }
    Ok(())
}
