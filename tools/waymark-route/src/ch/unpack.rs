//! Shortcut expansion back to base road segments

use std::fmt;

use tracing::trace;

use super::index::ChIndex;
use crate::graph::NodeIdx;

/// The index has no arc between two consecutive path nodes, or a shortcut
/// whose middle node does not rank below both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingArc {
    pub from: NodeIdx,
    pub to: NodeIdx,
}

impl fmt::Display for MissingArc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hierarchy has no usable arc {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for MissingArc {}

/// Expands one overlay arc, appending every node after `from` to `out`.
///
/// Uses an explicit stack so deep hierarchies cannot overflow the call stack.
/// The second half is pushed first so the first half pops next.
pub fn unpack_arc(
    index: &ChIndex,
    from: NodeIdx,
    to: NodeIdx,
    out: &mut Vec<NodeIdx>,
) -> Result<(), MissingArc> {
    let mut stack = vec![(from, to)];
    while let Some((a, b)) = stack.pop() {
        let arc = index.arc(a, b).ok_or(MissingArc { from: a, to: b })?;
        if !arc.is_shortcut() {
            out.push(b);
            continue;
        }
        let via = arc.via;
        let via_rank = index.rank(via);
        if via_rank >= index.rank(a) || via_rank >= index.rank(b) {
            trace!(from = a, to = b, via, "shortcut via does not rank below its ends");
            return Err(MissingArc { from: a, to: b });
        }
        stack.push((via, b));
        stack.push((a, via));
    }
    Ok(())
}

/// Expands a hierarchy path into the full base-graph node sequence.
pub fn unpack_path(index: &ChIndex, path: &[NodeIdx]) -> Result<Vec<NodeIdx>, MissingArc> {
    let Some(&first) = path.first() else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(path.len() * 2);
    out.push(first);
    for pair in path.windows(2) {
        unpack_arc(index, pair[0], pair[1], &mut out)?;
    }
    Ok(out)
}
